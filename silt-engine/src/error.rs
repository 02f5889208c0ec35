use std::error::{Error};
use std::fmt::{self, Debug, Display, Formatter};

/**
Constructs an [`SError`](struct.SError.html) from a format string.

```ignore
let err = error!("expected a pair, received {}", val.a_type_name());
```
*/

#[macro_export]
macro_rules! error {
	() => (
		$crate::SError::new()
	);
	($fmt:literal) => (
		$crate::SError::from_str($fmt)
	);
	($fmt:literal, $($arg:tt)+) => (
		$crate::SError::from_string(format!($fmt, $($arg)+))
	);
}

/**
Constructs an [`SError`](struct.SError.html) and returns it immediately.

```ignore
if !self.is_pair(v) {
	bail!("expected a pair, received {}", v.a_type_name())
}
```
*/

#[macro_export]
macro_rules! bail {
	() => (
		return Err($crate::error!())
	);
	($fmt:literal) => (
		return Err($crate::error!($fmt))
	);
	($fmt:literal, $($arg:tt)+) => (
		return Err($crate::error!($fmt, $($arg)+))
	);
}

/**
Tests a condition, returning an [`SError`](struct.SError.html) when it fails.

```ignore
ensure!(i < regc, "register {} out of bounds for a cxt of {} registers", i, regc);
```
*/

#[macro_export]
macro_rules! ensure {
	($cond:expr) => (
		if !($cond) {
			$crate::bail!("ensure!({}) failed", stringify!($cond))
		}
	);
	($cond:expr, $fmt:literal) => (
		if !($cond) {
			$crate::bail!($fmt)
		}
	);
	($cond:expr, $fmt:literal, $($arg:tt)+) => (
		if !($cond) {
			$crate::bail!($fmt, $($arg)+)
		}
	);
}

/**
The generic error type. Constructed using the [`error!`](macro.error.html),
[`bail!`](macro.bail.html) and [`ensure!`](macro.ensure.html) macros.

The only errors which are *not* represented as an `SError` are the fatal ones: memory
exhaustion panics, because recovery is not supported.
*/

pub struct SError {
	msg: String
}

/// Shorthand for a `Result` with [`SError`](struct.SError.html) as its error type.
pub type SResult<T> = Result<T, SError>;

impl SError {
	#[doc(hidden)]
	pub fn new() -> SError {
		SError {
			msg: String::new()
		}
	}

	#[doc(hidden)]
	pub fn from_str(msg: &str) -> SError {
		SError {
			msg: msg.to_string()
		}
	}

	#[doc(hidden)]
	pub fn from_string(msg: String) -> SError {
		SError {
			msg
		}
	}

	pub fn message(&self) -> &str {
		&self.msg
	}
}

impl Default for SError {
	fn default() -> SError {
		SError::new()
	}
}

impl Display for SError {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "{}", self.msg)
	}
}

impl Debug for SError {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "SError({:?})", self.msg)
	}
}

impl Error for SError { }
