// MIT License
//
// Copyright (c) 2019-2023 Tobias Pfeiffer
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

#![warn(clippy::all)]
#![forbid(unsafe_code)]

static LOGGER: Logger = Logger;

pub fn get() -> &'static Logger {
    &LOGGER
}

/// Installs the logger and sets the given max level. Panics if a logger
/// was already installed.
pub fn init(level: log::LevelFilter) {
    log::set_logger(get()).expect("logger already installed");
    log::set_max_level(level);
}

pub struct Logger;

impl log::Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        use {std::io::Write, log::Level::*};

        // NO_COLOR <https://no-color.org/>
        let color = std::env::var_os("NO_COLOR").is_none();

        let (style, label) = match record.level() {
            Trace => ("\x1b[90m", "TRACE"),
            Debug => ("\x1b[32m", "DEBUG"),
            Info  => ("\x1b[0m",  "INFO "),
            Warn  => ("\x1b[33m", "WARN "),
            Error => ("\x1b[31m", "ERROR"),
        };

        let thread = std::thread::current();
        let thread = thread.name().unwrap_or("unnamed").to_string();
        let date   = chrono::Utc::now().format("%F %T%.3f");
        let target = match record.line() {
            Some(line) => format!("{}:{}", record.target(), line),
            None       => record.target().to_string()
        };

        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();

        if color {
            writeln!(&mut stdout, "{}{} {} {:40} {:16} {}\x1b[0m",
                     style, date, label, target, thread, record.args())
        } else {
            writeln!(&mut stdout, "{} {} {:40} {:16} {}",
                     date, label, target, thread, record.args())
        }.unwrap_or(());
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod test {
    use super::*;

    #[ignore]
    #[test]
    fn log() {
        init(log::LevelFilter::Trace);

        log::trace!("test trace");
        log::debug!("test debug");
        log::info!("test info");
        log::warn!("test warn");
        log::error!("test error");
    }
}
