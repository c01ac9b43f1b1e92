// Diagnostics go to whichever of `log` or `tracing` is enabled. With neither
// feature the arguments are still evaluated so call sites stay warning free.
// Every level expands to one block, usable as a statement or a match arm.

/// forwards one event to the enabled logging backends
macro_rules! log_event {
	($level:ident, $($expr:expr),*) => ({
		#[cfg(feature = "tracing")]
		{
			tracing::$level!($($expr),*);
		};

		#[cfg(feature = "log")]
		{
			log::$level!($($expr),*);
		};

		#[cfg(not(any(feature = "tracing", feature = "log")))]
		{
			$(
				let _ = &$expr;
			)*
		};
	})
}

/// on-disk layout dumps and per-step decisions
macro_rules! trace {
	($($expr:expr),*) => (log_event!(trace, $($expr),*))
}

/// which copy was used, repaired or written
macro_rules! debug {
	($($expr:expr),*) => (log_event!(debug, $($expr),*))
}

/// degraded but non-fatal conditions, e.g. a backup that cannot be written
macro_rules! warn {
	($($expr:expr),*) => (log_event!(warn, $($expr),*))
}
