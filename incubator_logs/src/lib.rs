//UTXO Incubator
//Copyright (C) 2018  The UTXO Incubator Developers

//This program is free software: you can redistribute it and/or modify
//it under the terms of the GNU Affero General Public License as published by
//the Free Software Foundation, either version 3 of the License, or
//(at your option) any later version.

//This program is distributed in the hope that it will be useful,
//but WITHOUT ANY WARRANTY; without even the implied warranty of
//MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//GNU Affero General Public License for more details.

//You should have received a copy of the GNU Affero General Public License
//along with this program.  If not, see <http://www.gnu.org/licenses/>.


//! # Incubator Logs
//!
//! A collection of standard log codes emitted by the UTXO incubator. Every
//! log line is one JSON object carrying a stable log ID, so monitoring can
//! match on codes rather than message text.
//!

// Coding conventions
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

extern crate bitcoin;
#[macro_use] extern crate lazy_static;
extern crate serde;
#[macro_use] extern crate serde_derive;
extern crate serde_json;
extern crate time;

extern crate incubator_common as common;

#[macro_use] pub mod log;
pub mod nursery;
pub use self::nursery::*;
pub mod log_codes;

use std::{fmt, io, sync, thread};

use common::ChainContext;

/// The log ID prefix for incubator logs.
pub const ID_PREFIX_INCUBATOR: &str = "N";

/// Structure representing global log context
pub struct GlobalContext {
    /// Handle to output writer.
    out: Box<dyn io::Write + Send>,
    /// Name of the running process
    name: &'static str,
    /// Minimum severity at which to output a log
    min_severity: Severity,
}

lazy_static! {
    static ref GLOBAL_CONTEXT: sync::Mutex<GlobalContext> = sync::Mutex::new(
        GlobalContext {
            #[cfg(not(test))]
            out: Box::new(io::sink()),
            #[cfg(test)]
            out: Box::new(io::stdout()),
            name: "-",
            min_severity: Severity::Trace,
        }
    );

    static ref CHAIN_CONTEXT: sync::Mutex<ChainContext> = sync::Mutex::new(
        Default::default()
    );
}

/// Initialize the logging infrastructure
pub fn initialize(min_severity: Severity, name: &'static str, out: Box<dyn io::Write + Send>) {
    let mut lock = GLOBAL_CONTEXT.lock().unwrap();
    lock.out = out;
    lock.name = name;
    lock.min_severity = min_severity;
}

/// Set the global chain context to some new value
pub fn set_chain_context(new_context: ChainContext) {
    let mut lock = CHAIN_CONTEXT.lock().unwrap();
    *lock = new_context;
}

/// Obtain the current global chain context
pub fn get_chain_context() -> ChainContext {
    *CHAIN_CONTEXT.lock().unwrap()
}

/// The format string of the log timestamps.
pub const TIME_FORMAT: &str = "%F %T.%f%z";

fn serialize_time<S: serde::Serializer>(t: &time::Tm, s: S) -> Result<S::Ok, S::Error> {
    let tmfmt = t.strftime(TIME_FORMAT).unwrap();
    s.collect_str(&tmfmt)
}

fn deserialize_time<'de, D>(d: D) -> Result<time::Tm, D::Error>
    where D: serde::Deserializer<'de>,
{
    struct TmVisitor;
    impl<'de> serde::de::Visitor<'de> for TmVisitor {
        type Value = time::Tm;
        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a timestamp")
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> where E: serde::de::Error {
            time::strptime(v, TIME_FORMAT).map_err(serde::de::Error::custom)
        }
    }
    d.deserialize_str(TmVisitor)
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Severity of the log
pub enum Severity {
    /// Trace message (may contain secret data, will not be enabled on
    /// production systems)
    Trace,
    /// Debugging information
    Debug,
    /// Standard operation information
    Info,
    /// Potential problem
    Warn,
    /// Actual problem
    Error,
    /// Serious problem for which the program should be terminated.
    /// Logging such an error will cause the program to terminate.
    Fatal,
}

impl Severity {
    /// Severity in uppercase.
    pub fn upper(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// A log message as generated by this crate. This can be used by the user to
/// interpret the log with zero-copy deserialization.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LogMessage<'a> {
    #[serde(serialize_with = "serialize_time", deserialize_with = "deserialize_time")]
    pub time: time::Tm,
    pub process: &'a str,
    #[serde(default)]
    pub thread: Option<&'a str>,
    pub severity: Severity,
    pub log_id: &'a str,
    pub desc: &'a str,
    pub name: &'a str,
    pub file: &'a str,
    pub line: u32,
    pub context: ChainContext,
    #[serde(borrow)]
    pub data: &'a serde_json::value::RawValue,
}

impl<'a> LogMessage<'a> {
    /// Parse the internal data, suggested to be used with explicit type parameter.
    pub fn parse<T: serde::Deserialize<'a>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.data.get())
    }

    /// Try interpret the log as the given log type.
    pub fn try_as<T: Log + serde::Deserialize<'a>>(&self) -> Option<T> {
        if self.log_id == T::LOG_ID {
            Some(self.parse().expect(&format!("log msg {} doesn't roundtrip", T::LOG_ID)))
        } else {
            None
        }
    }
}

/// Internal generic version of [LogMessage].
#[derive(Serialize)]
struct InternalLogMessage<'a, D: serde::Serialize + 'a> {
    // Make sure this struct is always compatible with [LogMessage].
    #[serde(serialize_with = "serialize_time")]
    time: time::Tm,
    process: &'a str,
    #[serde(default)]
    thread: Option<&'a str>,
    severity: Severity,
    log_id: &'static str,
    desc: &'a str,
    name: &'a str,
    file: &'a str,
    line: u32,
    context: ChainContext,
    data: &'a D,
}

/// Main log structure
pub trait Log: serde::Serialize + Sized {
    /// Severity level
    const SEVERITY: Severity;

    /// Unique log ID
    const LOG_ID: &'static str;

    /// Human-readable description
    fn desc(&self) -> &str;

    fn log_inner(&self, mut output_sink: &mut Box<dyn io::Write + Send>,
        process: &str, file: &str, line: u32, name: &str, context: ChainContext)
    {
        debug_assert!(&Self::LOG_ID[0..1] == ID_PREFIX_INCUBATOR);

        serde_json::to_writer(
            &mut output_sink,
            &InternalLogMessage {
                time: time::now(),
                process: process,
                thread: thread::current().name(),
                severity: Self::SEVERITY,
                log_id: Self::LOG_ID,
                desc: self.desc(),
                name: name,
                file: file,
                line: line,
                context: context,
                data: self,
            },
        ).expect("writing log line");
        writeln!(output_sink, "").expect("writing newline");
    }

    /// Output the log line
    fn log(&self, file: &str, line: u32, name: &str, ctx: ChainContext) {
        let mut gctx = GLOBAL_CONTEXT.lock().unwrap();
        let gctx = &mut *gctx;  // coach borrowck on individual fields resulting from MutexGuard

        if Self::SEVERITY < gctx.min_severity {
            return;
        }

        let process = gctx.name;
        self.log_inner(&mut gctx.out, process, file, line, name, ctx);

        assert!(Self::SEVERITY != Severity::Fatal,
            "fatal log was not called with slog_fatal: {}", Self::LOG_ID,
        );
    }

    /// Output the log line and abort the program
    fn log_fatal(&self, file: &str, line: u32, name: &str, ctx: ChainContext) -> ! {
        {
            let mut gctx = GLOBAL_CONTEXT.lock().unwrap();
            let gctx = &mut *gctx;

            let process = gctx.name;
            self.log_inner(&mut gctx.out, process, file, line, name, ctx);
        }

        // Include log code in panic message to aid unit testing.
        panic!("Encountered fatal log {}.", Self::LOG_ID);
    }
}

/// Obtain the filename of the source file a log is coming from,
/// with the long path stripped
#[macro_export]
macro_rules! filename {
    () => (file!().rsplit("incubator/").next().unwrap())
}

/// Create a structured log.
///
/// Usage:
/// ```rust,ignore
/// slog!(SweepBroadcast, txid: txid, num_outputs: kids.len(), height: height);
/// ```
#[macro_export]
macro_rules! slog {
    ($struct:ident) => {{
        $crate::Log::log(&$crate::$struct { }, $crate::filename!(), line!(), stringify!($struct), $crate::get_chain_context())
    }};
    ($struct:ident, $( $args:tt )*) => {{
        $crate::Log::log(&$crate::$struct {
            $( $args )*
        }, $crate::filename!(), line!(), stringify!($struct), $crate::get_chain_context())
    }};
}

/// Create a fatal structured log.
///
/// Usage similar to slog!.
#[macro_export]
macro_rules! slog_fatal {
    ($struct:ident, $( $args:tt )*) => {{
        $crate::Log::log_fatal(&$crate::$struct {
            $( $args )*
        }, $crate::filename!(), line!(), stringify!($struct), $crate::get_chain_context())
    }}
}

/// A legacy unstructured log message generated by code that has not converted
/// to using the new mechanism. Trace-level.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct UnstructuredTrace {
    /// Free-form output
    pub message: String,
}

/// A free-form log message. Debug-level.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct UnstructuredDebug {
    /// Free-form output
    pub message: String,
}

/// A free-form log message. Info-level.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct UnstructuredInfo {
    /// Free-form output
    pub message: String,
}

/// A free-form log message. Warn-level.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct UnstructuredWarn {
    /// Free-form output
    pub message: String,
}

/// A free-form log message. Error-level.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct UnstructuredError {
    /// Free-form output
    pub message: String,
}

/// A free-form log message. Fatal-level.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct UnstructuredFatal {
    /// Free-form output
    pub message: String,
}
