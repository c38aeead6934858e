//! Leveled trace output with group include filters.
//!
//! Every line goes to a `ufmt` sink as `[LEVEL][group]: message\r\n`. On the
//! board the sink is the UART console; tests capture into a string.

use core::convert::Infallible;
use ufmt::{uDisplay, uWrite, Formatter};

/// Upper bound on include filters, like `"main,MCUb,BL"`.
pub const MAX_FILTERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DBG",
        }
    }
}

pub struct Tracer<W> {
    sink: W,
    max_level: Level,
    filters: [&'static str; MAX_FILTERS],
    filter_count: usize,
}

impl<W: uWrite> Tracer<W> {
    /// Tracer at `Info` that admits every group.
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            max_level: Level::Info,
            filters: [""; MAX_FILTERS],
            filter_count: 0,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    pub fn set_level(&mut self, level: Level) {
        self.max_level = level;
    }

    /// Restricts output to the comma separated groups. An empty list admits
    /// all groups. Returns how many groups were kept; groups past
    /// `MAX_FILTERS` are dropped.
    pub fn set_include_filters(&mut self, groups: &'static str) -> usize {
        self.filter_count = 0;
        for group in groups.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            if self.filter_count == MAX_FILTERS {
                break;
            }
            self.filters[self.filter_count] = group;
            self.filter_count += 1;
        }
        self.filter_count
    }

    pub fn enabled(&self, level: Level, group: &str) -> bool {
        if level > self.max_level {
            return false;
        }
        self.filter_count == 0 || self.filters[..self.filter_count].iter().any(|f| *f == group)
    }

    /// Writes the line prefix and hands out the sink for the message body.
    /// Callers finish the line with [`Tracer::end`]. Use the `tr_*` macros.
    pub fn begin(&mut self, level: Level, group: &str) -> Option<&mut W> {
        if !self.enabled(level, group) {
            return None;
        }
        let _ = self.sink.write_str("[");
        let _ = self.sink.write_str(level.tag());
        let _ = self.sink.write_str("][");
        let _ = self.sink.write_str(group);
        let _ = self.sink.write_str("]: ");
        Some(&mut self.sink)
    }

    pub fn end(&mut self) {
        let _ = self.sink.write_str("\r\n");
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl uWrite for NullSink {
    type Error = Infallible;

    fn write_str(&mut self, _s: &str) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Renders a `u32` as `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hex(pub u32);

impl uDisplay for Hex {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        const HEX_CHARS: [u8; 16] = *b"0123456789abcdef";

        let mut digits = [0u8; 8];
        let mut count = 0;
        let mut value = self.0;
        loop {
            digits[count] = HEX_CHARS[(value & 0xF) as usize];
            count += 1;
            value >>= 4;
            if value == 0 {
                break;
            }
        }

        let mut out = [0u8; 10];
        out[0] = b'0';
        out[1] = b'x';
        for (i, digit) in digits[..count].iter().rev().enumerate() {
            out[2 + i] = *digit;
        }

        match core::str::from_utf8(&out[..2 + count]) {
            Ok(s) => f.write_str(s),
            Err(_) => Ok(()),
        }
    }
}

#[macro_export]
macro_rules! trace_at {
    ($tracer:expr, $level:expr, $group:expr, $($arg:tt)+) => {{
        let tracer = &mut *$tracer;
        if let Some(sink) = tracer.begin($level, $group) {
            let _ = $crate::ufmt::uwrite!(sink, $($arg)+);
            tracer.end();
        }
    }};
}

#[macro_export]
macro_rules! tr_error {
    ($tracer:expr, $group:expr, $($arg:tt)+) => {
        $crate::trace_at!($tracer, $crate::trace::Level::Error, $group, $($arg)+)
    };
}

#[macro_export]
macro_rules! tr_warn {
    ($tracer:expr, $group:expr, $($arg:tt)+) => {
        $crate::trace_at!($tracer, $crate::trace::Level::Warn, $group, $($arg)+)
    };
}

#[macro_export]
macro_rules! tr_info {
    ($tracer:expr, $group:expr, $($arg:tt)+) => {
        $crate::trace_at!($tracer, $crate::trace::Level::Info, $group, $($arg)+)
    };
}

#[macro_export]
macro_rules! tr_debug {
    ($tracer:expr, $group:expr, $($arg:tt)+) => {
        $crate::trace_at!($tracer, $crate::trace::Level::Debug, $group, $($arg)+)
    };
}
