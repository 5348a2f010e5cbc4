//! Error reporting built off the Rust standard library [Error] trait.
//!
//! The runtime distinguishes hard failures, which are returned to the caller, from soft warnings,
//! where the operation proceeds with a fallback and the problem only shows up in the log. These
//! extensions give both a single formatting path.

use std::{error::Error, fmt};

use derive_where::derive_where;

// === Error formatting === //

pub trait ErrorFormatExt: Error {
	fn format_error(&self) -> FormattedError<'_, Self> {
		FormattedError(self)
	}

	fn log_error(&self) {
		log::error!("{}", self.format_error());
	}

	fn log_warn(&self) {
		log::warn!("{}", self.format_error());
	}
}

impl<T: ?Sized + Error> ErrorFormatExt for T {}

#[derive_where(Copy, Clone)]
pub struct FormattedError<'a, T: ?Sized>(pub &'a T);

impl<T: ?Sized + Error> fmt::Display for FormattedError<'_, T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let target = self.0;

		write!(f, "{}", target)?;

		let mut cause_iter = target.source();
		if cause_iter.is_some() {
			write!(f, "\n\nCaused by:")?;
		}

		while let Some(cause) = cause_iter {
			for line in cause.to_string().lines() {
				write!(f, "\n\t{}", line)?;
			}
			cause_iter = cause.source();
		}

		Ok(())
	}
}

// === Result extensions === //

pub trait ResultExt<T> {
	/// Logs the error at warning severity and discards it.
	fn log_warn(self) -> Option<T>;

	/// Logs the error at error severity and discards it.
	fn log_error(self) -> Option<T>;
}

impl<T, E: Error> ResultExt<T> for Result<T, E> {
	fn log_warn(self) -> Option<T> {
		match self {
			Ok(val) => Some(val),
			Err(err) => {
				err.log_warn();
				None
			}
		}
	}

	fn log_error(self) -> Option<T> {
		match self {
			Ok(val) => Some(val),
			Err(err) => {
				err.log_error();
				None
			}
		}
	}
}
