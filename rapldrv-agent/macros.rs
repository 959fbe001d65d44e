//! Declarative macros for the table-driven enums of the rapldrv protocol

/// Define an enum with name() and all() methods, plus custom data per variant
///
/// # Example
/// ```
/// use rapldrv::enum_with_data;
///
/// enum_with_data! {
///     pub enum Domain: u32 {
///         Package => ("package", 0x611),
///         Dram => ("dram", 0x619),
///     }
///     impl register -> u32
/// }
///
/// let domain = Domain::Dram;
/// assert_eq!(domain.name(), "dram");
/// assert_eq!(domain.register(), 0x619);
/// assert_eq!(Domain::all().len(), 2);
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

/// Define a function-code table: each variant pairs a 12-bit function
/// selector with the register it reads
///
/// # Example
/// ```
/// use rapldrv::function_table;
///
/// function_table! {
///     pub enum Op {
///         Units => ("Units", 0xBEB, 0x606),
///     }
/// }
///
/// assert_eq!(Op::from_function(0xBEB), Some(Op::Units));
/// assert_eq!(Op::Units.register(), 0x606);
/// assert_eq!(Op::from_function(0x001), None);
/// ```
#[macro_export]
macro_rules! function_table {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => ($str:literal, $function:expr, $register:expr)),* $(,)?
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

            pub fn function(&self) -> u16 {
                match self {
                    $($name::$variant => $function,)*
                }
            }

            pub fn register(&self) -> u32 {
                match self {
                    $($name::$variant => $register,)*
                }
            }

            pub fn from_function(function: u16) -> Option<$name> {
                Self::all().into_iter().find(|op| op.function() == function)
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}
