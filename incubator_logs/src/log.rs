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


//! # Simple Log
//! Logging infrastructure
//!

use std::fmt;

/// The main logging function
#[cfg(test)]
pub fn log<T: fmt::Display>(_: &str, _: u32, _: crate::Severity, _: &T) {
    // don't log in unit tests
}

/// The main logging function
#[cfg(not(test))]
pub fn log<T: fmt::Display>(file: &str, line: u32, level: crate::Severity, message: &T) {
    // Can't use slog! here since we want the line/file info to come from the
    // original log call's context (vs. from inside this routine).

    use get_chain_context;
    use UnstructuredTrace;
    use UnstructuredDebug;
    use UnstructuredInfo;
    use UnstructuredWarn;
    use UnstructuredError;
    use UnstructuredFatal;

    match level {
        crate::Severity::Trace => {
            crate::Log::log(
                &UnstructuredTrace { message: message.to_string() },
                &file, line, "UnstructuredTrace", get_chain_context(),
            );
        }
        crate::Severity::Debug => {
            crate::Log::log(&UnstructuredDebug { message: message.to_string() },
                &file, line, "UnstructuredDebug", get_chain_context(),
            );
        }
        crate::Severity::Info => {
            crate::Log::log(&UnstructuredInfo { message: message.to_string() },
                &file, line, "UnstructuredInfo", get_chain_context(),
            );
        }
        crate::Severity::Warn => {
            crate::Log::log(&UnstructuredWarn { message: message.to_string() },
                &file, line, "UnstructuredWarn", get_chain_context(),
            );
        }
        crate::Severity::Error => {
            crate::Log::log(&UnstructuredError { message: message.to_string() },
                &file, line, "UnstructuredError", get_chain_context(),
            );
        }
        crate::Severity::Fatal => {
            crate::Log::log_fatal(&UnstructuredFatal { message: message.to_string() },
                &file, line, "UnstructuredFatal", get_chain_context(),
            );
        }
    }
}

/// Macro that infers the file and line number.
#[macro_export]
macro_rules! log {
    ($level:ident, $($arg:tt)+) => ({
        let filename = $crate::filename!();
        $crate::log::log(filename, line!(), $crate::Severity::$level, &format_args!($($arg)+))
    })
}

/// `try!` equivalent that logs on error
#[macro_export]
macro_rules! log_try {
    ($level:ident, $e:expr) => ({
        match $e {
            Ok(res) => res,
            Err(e) => {
                let filename = $crate::filename!();
                $crate::log::log(filename, line!(), $crate::Severity::$level, &e);
                return Err(From::from(e));
            }
        }
    })
}

#[cfg(test)]
mod tests {

    fn use_log_try() -> Result<String, String> {
        let good_result: Result<String, String>
                = Ok("This should not be printed".to_string());
        let bad_result: Result<String, String>
                = Err("Test log_try".to_string());
        let r = log_try!(Warn, good_result);
        log_try!(Debug, bad_result);
        return Ok(r);
    }

    #[test]
    fn output() {
        log!(Warn, "Test incubator error");
        assert!(use_log_try().is_err());
    }
}
