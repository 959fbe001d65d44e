//! Typed views over raw 64-bit register values

/// Conversion between a structured register layout and its raw MSR value
///
/// # Example
///
/// ```ignore
/// use rapldrv_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct Counter {
///     ticks: u32,
/// }
///
/// impl RegisterLayout for Counter {
///     const ADDRESS: u32 = 0x611;
///
///     fn to_msr_value(&self) -> u64 {
///         self.ticks as u64
///     }
///
///     fn from_msr_value(value: u64) -> Self {
///         Self { ticks: value as u32 }
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Register this layout is read from
    const ADDRESS: u32;

    /// Convert this register layout to a raw MSR value
    fn to_msr_value(&self) -> u64;

    /// Parse a raw MSR value into this register layout
    fn from_msr_value(value: u64) -> Self;

    /// Validate that the register values are within acceptable ranges
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

/// Parse `value` as layout `T` if it was read from `T::ADDRESS`.
pub fn decode_as<T: RegisterLayout>(address: u32, value: u64) -> Option<T> {
    (address == T::ADDRESS).then(|| T::from_msr_value(value))
}
