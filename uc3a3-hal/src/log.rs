//! # Simple logging providers
//!
//! Only the first initialized logger is installed. Later calls to any of the init functions
//! return without effect.
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

static LOGGER_INIT_DONE: AtomicBool = AtomicBool::new(false);

const LOG_SEL_LOCKED: u8 = 1;
const LOG_SEL_UNSAFE_SINGLE_CORE: u8 = 2;

static LOG_SEL: AtomicU8 = AtomicU8::new(0);

/// Blocking USART loggers.
pub mod uart_blocking {
    use super::*;
    use core::cell::{RefCell, UnsafeCell};
    use embedded_io::Write as _;

    use critical_section::Mutex;
    use log::{LevelFilter, set_logger, set_max_level};

    use crate::usart::Usart;

    pub struct UsartLoggerBlocking(Mutex<RefCell<Option<Usart>>>);

    unsafe impl Send for UsartLoggerBlocking {}
    unsafe impl Sync for UsartLoggerBlocking {}

    static USART_LOGGER_BLOCKING: UsartLoggerBlocking =
        UsartLoggerBlocking(Mutex::new(RefCell::new(None)));

    /// Initialize the logger with a blocking USART instance.
    ///
    /// This is a blocking logger which performs a write inside a critical section. This logger is
    /// thread-safe, but interrupts will be disabled while the logger is writing to the USART.
    pub fn init_with_locks(usart: Usart, level: LevelFilter) {
        if LOGGER_INIT_DONE.swap(true, Ordering::Relaxed) {
            return;
        }
        LOG_SEL.store(LOG_SEL_LOCKED, Ordering::Relaxed);
        critical_section::with(|cs| {
            let inner = USART_LOGGER_BLOCKING.0.borrow(cs);
            inner.replace(Some(usart));
        });
        if set_logger(&USART_LOGGER_BLOCKING).is_ok() {
            set_max_level(level);
        }
    }

    impl log::Log for UsartLoggerBlocking {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            critical_section::with(|cs| {
                let mut opt_usart = self.0.borrow(cs).borrow_mut();
                if let Some(usart) = opt_usart.as_mut() {
                    let _ = writeln!(usart, "{} - {}\r", record.level(), record.args());
                }
            })
        }

        fn flush(&self) {
            critical_section::with(|cs| {
                let mut opt_usart = self.0.borrow(cs).borrow_mut();
                if let Some(usart) = opt_usart.as_mut() {
                    usart.flush();
                }
            });
        }
    }

    pub struct UsartLoggerUnsafeSingleThread {
        usart: UnsafeCell<Option<Usart>>,
    }

    unsafe impl Send for UsartLoggerUnsafeSingleThread {}
    unsafe impl Sync for UsartLoggerUnsafeSingleThread {}

    static USART_LOGGER_UNSAFE_SINGLE_THREAD: UsartLoggerUnsafeSingleThread =
        UsartLoggerUnsafeSingleThread {
            usart: UnsafeCell::new(None),
        };

    /// Initialize the logger with a blocking USART instance which does not use locks.
    ///
    /// # Safety
    ///
    /// This is a blocking logger which performs a write WITHOUT a critical section. This logger is
    /// NOT thread-safe, and log calls from interrupt handlers might lead to garbled output.
    pub unsafe fn init_unsafe_single_core(usart: Usart, level: LevelFilter) {
        if LOGGER_INIT_DONE.swap(true, Ordering::Relaxed) {
            return;
        }
        LOG_SEL.store(LOG_SEL_UNSAFE_SINGLE_CORE, Ordering::Relaxed);
        let opt_usart = unsafe { &mut *USART_LOGGER_UNSAFE_SINGLE_THREAD.usart.get() };
        opt_usart.replace(usart);

        if set_logger(&USART_LOGGER_UNSAFE_SINGLE_THREAD).is_ok() {
            set_max_level(level);
        }
    }

    impl log::Log for UsartLoggerUnsafeSingleThread {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            if let Some(usart) = unsafe { &mut *self.usart.get() }.as_mut() {
                let _ = writeln!(usart, "{} - {}\r", record.level(), record.args());
            }
        }

        fn flush(&self) {
            if let Some(usart) = unsafe { &mut *self.usart.get() }.as_mut() {
                usart.flush();
            }
        }
    }

    // Flush the selected logger instance.
    pub fn flush() {
        match LOG_SEL.load(Ordering::Relaxed) {
            val if val == LOG_SEL_LOCKED => log::Log::flush(&USART_LOGGER_BLOCKING),
            val if val == LOG_SEL_UNSAFE_SINGLE_CORE => {
                log::Log::flush(&USART_LOGGER_UNSAFE_SINGLE_THREAD)
            }
            _ => (),
        }
    }
}

/// Logger module which logs into a ring buffer to allow asynchronous logging handling.
pub mod rb {
    use core::cell::RefCell;
    use core::fmt::Write as _;
    use core::sync::atomic::Ordering;

    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use log::{LevelFilter, set_logger, set_max_level};
    use ringbuf::{
        StaticRb,
        traits::{Consumer, Observer, Producer},
    };

    pub const BUF_SIZE: usize = 4096;
    pub const FRAME_QUEUE_DEPTH: usize = 32;

    pub type FrameQueue =
        embassy_sync::channel::Channel<CriticalSectionRawMutex, usize, FRAME_QUEUE_DEPTH>;

    /// Logger implementation which logs frames via a ring buffer and sends the frame sizes
    /// as messages.
    ///
    /// The logger does not require allocation and reserves [BUF_SIZE] bytes for both the
    /// formatting buffer and the ring buffer.
    pub struct Logger {
        frame_queue: FrameQueue,
        data_buf: critical_section::Mutex<RefCell<heapless::String<BUF_SIZE>>>,
        ring_buf: critical_section::Mutex<RefCell<Option<StaticRb<u8, BUF_SIZE>>>>,
    }

    unsafe impl Send for Logger {}
    unsafe impl Sync for Logger {}

    static LOGGER_RB: Logger = Logger {
        frame_queue: embassy_sync::channel::Channel::new(),
        data_buf: critical_section::Mutex::new(RefCell::new(heapless::String::new())),
        ring_buf: critical_section::Mutex::new(RefCell::new(None)),
    };

    impl log::Log for Logger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            critical_section::with(|cs| {
                let ref_buf = self.data_buf.borrow(cs);
                let mut buf = ref_buf.borrow_mut();
                buf.clear();
                let _ = writeln!(buf, "{} - {}\r", record.level(), record.args());
                let rb_ref = self.ring_buf.borrow(cs);
                let mut rb_opt = rb_ref.borrow_mut();
                let Some(rb) = rb_opt.as_mut() else {
                    return;
                };
                // Frames which do not fit completely are dropped.
                if self.frame_queue.is_full() || rb.vacant_len() < buf.len() {
                    return;
                }
                rb.push_slice(buf.as_bytes());
                let _ = self.frame_queue.try_send(buf.len());
            });
        }

        fn flush(&self) {
            while !self.frame_queue().is_empty() {}
        }
    }

    impl Logger {
        pub fn frame_queue(&self) -> &FrameQueue {
            &self.frame_queue
        }
    }

    pub fn init(level: LevelFilter) {
        if super::LOGGER_INIT_DONE.swap(true, Ordering::Relaxed) {
            return;
        }
        critical_section::with(|cs| {
            let rb = StaticRb::<u8, BUF_SIZE>::default();
            let rb_ref = LOGGER_RB.ring_buf.borrow(cs);
            rb_ref.borrow_mut().replace(rb);
        });
        if set_logger(&LOGGER_RB).is_ok() {
            set_max_level(level);
        }
    }

    /// Read the next frame with the length received from the frame queue. Returns the number of
    /// bytes read, which is smaller than the frame length if the buffer is too small.
    pub fn read_next_frame(frame_len: usize, buf: &mut [u8]) -> usize {
        let read_len = core::cmp::min(frame_len, buf.len());
        critical_section::with(|cs| {
            let rb_ref = LOGGER_RB.ring_buf.borrow(cs);
            let mut rb = rb_ref.borrow_mut();
            match rb.as_mut() {
                Some(rb) => {
                    let read = rb.pop_slice(&mut buf[0..read_len]);
                    // Discard the rest of a truncated frame to stay aligned on frame boundaries.
                    rb.skip(frame_len - read_len);
                    read
                }
                None => 0,
            }
        })
    }

    pub fn get_frame_queue() -> &'static FrameQueue {
        LOGGER_RB.frame_queue()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn frames_through_ring_buffer() {
            init(LevelFilter::Info);
            log::info!("hello {}", 42);
            let queue = get_frame_queue();
            let mut buf = [0u8; 256];
            let mut found = false;
            // Other tests may log concurrently.
            while let Ok(frame_len) = queue.try_receive() {
                let read = read_next_frame(frame_len, &mut buf);
                if &buf[..read] == b"INFO - hello 42\r\n" {
                    found = true;
                }
            }
            assert!(found);
        }
    }
}
