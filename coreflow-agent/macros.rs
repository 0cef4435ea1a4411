//! Declarative macros shared by the metric enums

/// Define a metric enum with automatic `name()` and `all()` implementations
///
/// # Example
/// ```
/// use coreflow::metric_enum;
///
/// metric_enum! {
///     pub enum PowerMetric {
///         PackagePower => "package_power_watts",
///         CorePower => "pp0_power_watts",
///     }
/// }
///
/// let metric = PowerMetric::PackagePower;
/// assert_eq!(metric.name(), "package_power_watts");
/// assert_eq!(PowerMetric::all().len(), 2);
/// ```
///
/// Expands to:
/// - An enum with Debug, Clone, Copy, PartialEq, Eq, Hash derives
/// - A `name(&self) -> &'static str` method
/// - An `all() -> Vec<Self>` method
#[macro_export]
macro_rules! metric_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $str:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}

/// Define an enum with name() and all() methods, plus custom data per variant
///
/// # Example
/// ```
/// use coreflow::enum_with_data;
///
/// enum_with_data! {
///     pub enum FixedCounter: u64 {
///         Instructions => ("instructions", 0x309),
///         CoreCycles => ("core_cycles", 0x30A),
///         RefCycles => ("ref_cycles", 0x30B),
///     }
///     impl address -> u64
/// }
///
/// let counter = FixedCounter::CoreCycles;
/// assert_eq!(counter.name(), "core_cycles");
/// assert_eq!(counter.address(), 0x30A);
/// ```
#[macro_export]
macro_rules! enum_with_data {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $data_type:ty {
            $($variant:ident => ($str:literal, $data:expr)),* $(,)?
        }
        impl $method:ident -> $return_type:ty
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn $method(&self) -> $return_type {
                match self {
                    $($name::$variant => $data,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}
