//! String conversion utilities for Windows API

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

/// Convert a Rust string to a NUL-terminated wide string (UTF-16)
pub fn string_to_wide(s: &str) -> Vec<u16> {
    os_to_wide(OsStr::new(s))
}

/// Convert a path to a NUL-terminated wide string without a lossy detour
pub fn path_to_wide(path: &Path) -> Vec<u16> {
    os_to_wide(path.as_os_str())
}

fn os_to_wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// Quote one command line argument the way the C runtime parses it back
pub fn quote_argument(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '"']) {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Build the mutable command line buffer for `CreateProcessW`
pub fn command_line(image: &Path, args: &[String]) -> Vec<u16> {
    let mut line = quote_argument(&image.to_string_lossy());
    for arg in args {
        line.push(' ');
        line.push_str(&quote_argument(arg));
    }
    string_to_wide(&line)
}
