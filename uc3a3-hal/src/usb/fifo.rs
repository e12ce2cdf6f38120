//! Endpoint FIFO access.
//!
//! Each endpoint has a memory mapped FIFO window. Copies use the widest access which the
//! common alignment of the RAM buffer and the FIFO position allows.
use core::ptr;

/// Copy `len` bytes from `src` to `dst`.
///
/// If both pointers share their alignment, the unaligned head is copied with narrow accesses,
/// the bulk with 64-bit accesses and the rest with 32-bit, 16-bit and byte accesses.
///
/// # Safety
///
/// Both pointers must be valid for `len` bytes and the regions must not overlap.
pub unsafe fn copy(dst: *mut u8, src: *const u8, len: usize) {
    let diff = dst as usize ^ src as usize;
    let mut done = 0;
    unsafe {
        if diff & 0b1 == 0 {
            if (src as usize + done) % 2 != 0 && done < len {
                copy_unit::<u8>(dst, src, &mut done);
            }
            if diff & 0b11 == 0 {
                if (src as usize + done) % 4 != 0 && len - done >= 2 {
                    copy_unit::<u16>(dst, src, &mut done);
                }
                if diff & 0b111 == 0 {
                    if (src as usize + done) % 8 != 0 && len - done >= 4 {
                        copy_unit::<u32>(dst, src, &mut done);
                    }
                    while len - done >= 8 {
                        copy_unit::<u64>(dst, src, &mut done);
                    }
                }
                while len - done >= 4 && (src as usize + done) % 4 == 0 {
                    copy_unit::<u32>(dst, src, &mut done);
                }
            }
            while len - done >= 2 && (src as usize + done) % 2 == 0 {
                copy_unit::<u16>(dst, src, &mut done);
            }
        }
        while done < len {
            copy_unit::<u8>(dst, src, &mut done);
        }
    }
}

#[inline(always)]
unsafe fn copy_unit<T: Copy>(dst: *mut u8, src: *const u8, done: &mut usize) {
    unsafe {
        let value = ptr::read_volatile(src.add(*done) as *const T);
        ptr::write_volatile(dst.add(*done) as *mut T, value);
    }
    *done += core::mem::size_of::<T>();
}

/// Access position inside the FIFO window of one endpoint.
#[derive(Debug)]
pub struct FifoCursor {
    base: *mut u8,
    pos: usize,
}

impl FifoCursor {
    pub const fn new(base: *mut u8) -> Self {
        Self { base, pos: 0 }
    }

    /// Restart at the beginning of the current bank.
    #[inline]
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    #[inline]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Copy up to `available` bytes of `data` into the FIFO. Returns the number of bytes not
    /// copied.
    ///
    /// # Safety
    ///
    /// The FIFO window must be valid for `available` bytes past the current position.
    pub unsafe fn write(&mut self, data: &[u8], available: usize) -> usize {
        let len = data.len().min(available);
        unsafe { copy(self.base.add(self.pos), data.as_ptr(), len) };
        self.pos += len;
        data.len() - len
    }

    /// Copy up to `available` bytes from the FIFO into `buf`. Returns the number of bytes not
    /// copied.
    ///
    /// # Safety
    ///
    /// The FIFO window must be valid for `available` bytes past the current position.
    pub unsafe fn read(&mut self, buf: &mut [u8], available: usize) -> usize {
        let len = buf.len().min(available);
        unsafe { copy(buf.as_mut_ptr(), self.base.add(self.pos), len) };
        self.pos += len;
        buf.len() - len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Aligned([u8; 64]);

    fn pattern() -> Aligned {
        let mut buf = Aligned([0; 64]);
        for (idx, byte) in buf.0.iter_mut().enumerate() {
            *byte = idx as u8 ^ 0x5A;
        }
        buf
    }

    #[test]
    fn copies_every_alignment_combination() {
        let src = pattern();
        for src_off in 0..8 {
            for dst_off in 0..8 {
                for len in [0, 1, 2, 3, 7, 8, 13, 31, 40] {
                    let mut dst = Aligned([0; 64]);
                    unsafe {
                        copy(
                            dst.0.as_mut_ptr().add(dst_off),
                            src.0.as_ptr().add(src_off),
                            len,
                        )
                    };
                    assert_eq!(
                        &dst.0[dst_off..dst_off + len],
                        &src.0[src_off..src_off + len],
                        "src {src_off} dst {dst_off} len {len}"
                    );
                    assert!(dst.0[..dst_off].iter().all(|b| *b == 0));
                    assert!(dst.0[dst_off + len..].iter().all(|b| *b == 0));
                }
            }
        }
    }

    #[test]
    fn cursor_limits_to_available_space() {
        let mut window = Aligned([0; 64]);
        let mut cursor = FifoCursor::new(window.0.as_mut_ptr());
        let data = [0xAB; 40];
        assert_eq!(unsafe { cursor.write(&data, 16) }, 24);
        assert_eq!(cursor.position(), 16);
        assert_eq!(unsafe { cursor.write(&data[16..], 48) }, 0);
        assert_eq!(cursor.position(), 40);

        cursor.reset();
        let mut buf = [0u8; 50];
        assert_eq!(unsafe { cursor.read(&mut buf, 40) }, 10);
        assert!(buf[..40].iter().all(|b| *b == 0xAB));
        assert!(buf[40..].iter().all(|b| *b == 0));
    }
}
