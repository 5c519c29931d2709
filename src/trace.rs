macro_rules! trace {
    ($($tt:tt)*) => {
        #[cfg(feature = "tracing")] {
            tracing::trace!("{:?}: {}", std::thread::current().id(), format_args!($($tt)*))
        }
    }
}

macro_rules! debug {
    ($($tt:tt)*) => {
        #[cfg(feature = "tracing")] {
            tracing::debug!("{:?}: {}", std::thread::current().id(), format_args!($($tt)*))
        }
    }
}

macro_rules! warning {
    ($($tt:tt)*) => {
        #[cfg(feature = "tracing")] {
            tracing::warn!($($tt)*)
        }
    }
}

pub(crate) use {debug, trace, warning};
