//! This module contains the logging front end used throughout the crate, and syntax helpers for
//! sharing a `MicRegistry` between the DMA interrupt handler and thread code.

// Logging goes to `defmt` when that feature is enabled, and to the `log` facade otherwise. Format
// strings must stay within the `{}` / `{:?}` subset both understand.

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        ::log::debug!($($arg)*);
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        ::log::info!($($arg)*);
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        ::log::warn!($($arg)*);
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        ::log::error!($($arg)*);
    }};
}

/// Syntax helper for getting global variables of the form `Mutex<RefCell<Option>>>` from an interrupt-free
/// context - eg in interrupt handlers. If the global hasn't been initialized yet, returns from the
/// enclosing function or closure; with a fourth argument, returns that value instead.
///
/// Example: `access_global!(MICS, mics, cs)`
#[macro_export]
macro_rules! access_global {
    ($NAME_GLOBAL:ident, $name_local:ident, $cs:expr) => {
        let mut part1 = $NAME_GLOBAL.borrow($cs).borrow_mut();
        let Some($name_local) = part1.as_mut() else {
            return;
        };
    };
    ($NAME_GLOBAL:ident, $name_local:ident, $cs:expr, $uninit:expr) => {
        let mut part1 = $NAME_GLOBAL.borrow($cs).borrow_mut();
        let Some($name_local) = part1.as_mut() else {
            return $uninit;
        };
    };
}

/// Syntax helper for setting global variables of the form `Mutex<RefCell<Option>>>`.
/// eg in interrupt handlers. Ideal for the registry, which can't be built until the peripherals
/// are taken.
///
/// Example: `make_globals!(
///     (MICS, MicRegistry<'static, Board>),
/// )`
#[macro_export]
macro_rules! make_globals {
    ($(($NAME:ident, $type:ty)),+ $(,)?) => {
        $(
            static $NAME: $crate::critical_section::Mutex<core::cell::RefCell<Option<$type>>> =
                $crate::critical_section::Mutex::new(core::cell::RefCell::new(None));
        )+
    };
}

/// Initialize one or more globals inside a critical section.
///
/// Usage:
/// ```rust,ignore
/// init_globals!(
///     (MICS, mics),
/// );
/// ```
#[macro_export]
macro_rules! init_globals {
    ($(($NAME:ident, $val:expr)),* $(,)?) => {
        $crate::critical_section::with(|cs| {
            $(
                $NAME.borrow(cs).replace(Some($val));
            )*
        });
    };
}
