//! `bash -lc '<script>'` unwrapping.

use std::borrow::Cow;

/// Return the inner script of a `bash -lc '<script>'` (or `bash -c`) line.
///
/// Only a line that is exactly those three words is unwrapped. Anything
/// after the script (`bash -lc 'ls' && rm -rf x`) leaves the line as is so
/// the trailing commands are still evaluated.
pub fn strip_bash_lc(line: &str) -> Cow<'_, str> {
    let Some(words) = shlex::split(line) else {
        return Cow::Borrowed(line);
    };
    match <[String; 3]>::try_from(words) {
        Ok([shell, flag, script]) if shell == "bash" && (flag == "-lc" || flag == "-c") => {
            Cow::Owned(script)
        }
        _ => Cow::Borrowed(line),
    }
}
