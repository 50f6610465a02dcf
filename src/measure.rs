//! Data type and unit codes understood by the dashboard.
//!
//! A [`Measure`] always carries both codes, so a unit without a type cannot
//! be expressed. The named constants are the table behind the typed write
//! helpers on [`Session`](crate::session::Session). None of them convert
//! values: `Measure::FAHRENHEIT` only labels a number that is already in
//! Fahrenheit.

use core::fmt;

/// The `type` half of a typed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataType {
    BarometricPressure,
    Battery,
    Luminosity,
    Proximity,
    RelativeHumidity,
    Temperature,
    Voltage,
    /// Any other code the dashboard accepts.
    Custom(&'static str),
}

impl DataType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataType::BarometricPressure => "bp",
            DataType::Battery => "batt",
            DataType::Luminosity => "lum",
            DataType::Proximity => "prox",
            DataType::RelativeHumidity => "rel_hum",
            DataType::Temperature => "temp",
            DataType::Voltage => "voltage",
            DataType::Custom(code) => code,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `unit` half of a typed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Unit {
    Undefined,
    Pascal,
    Hectopascal,
    /// Percent, 0 to 100.
    Percent,
    Ratio,
    Volts,
    Lux,
    Centimeter,
    Meter,
    /// Digital, 0 or 1.
    Digital,
    Fahrenheit,
    Celsius,
    Kelvin,
    Millivolts,
    Custom(&'static str),
}

impl Unit {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Unit::Undefined => "null",
            Unit::Pascal => "pa",
            Unit::Hectopascal => "hpa",
            Unit::Percent => "p",
            Unit::Ratio => "r",
            Unit::Volts => "v",
            Unit::Lux => "lux",
            Unit::Centimeter => "cm",
            Unit::Meter => "m",
            Unit::Digital => "d",
            Unit::Fahrenheit => "f",
            Unit::Celsius => "c",
            Unit::Kelvin => "k",
            Unit::Millivolts => "mv",
            Unit::Custom(code) => code,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data type together with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measure {
    pub data_type: DataType,
    pub unit: Unit,
}

impl Measure {
    pub const CELSIUS: Measure = Measure::new(DataType::Temperature, Unit::Celsius);
    pub const FAHRENHEIT: Measure = Measure::new(DataType::Temperature, Unit::Fahrenheit);
    pub const KELVIN: Measure = Measure::new(DataType::Temperature, Unit::Kelvin);
    pub const LUX: Measure = Measure::new(DataType::Luminosity, Unit::Lux);
    pub const PASCAL: Measure = Measure::new(DataType::BarometricPressure, Unit::Pascal);
    pub const HECTOPASCAL: Measure = Measure::new(DataType::BarometricPressure, Unit::Hectopascal);
    pub const RELATIVE_HUMIDITY: Measure = Measure::new(DataType::RelativeHumidity, Unit::Percent);
    pub const BATTERY: Measure = Measure::new(DataType::Battery, Unit::Percent);
    pub const VOLTS: Measure = Measure::new(DataType::Voltage, Unit::Volts);
    pub const MILLIVOLTS: Measure = Measure::new(DataType::Voltage, Unit::Millivolts);
    pub const PROXIMITY: Measure = Measure::new(DataType::Proximity, Unit::Centimeter);

    pub const fn new(data_type: DataType, unit: Unit) -> Self {
        Self { data_type, unit }
    }
}
