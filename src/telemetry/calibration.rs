//! Sensor calibration and status banding
//!
//! Pure mapping functions used when rendering readings. The soil and
//! light sensors report lower raw values for wetter soil and brighter
//! light, so both percentages invert the raw scale.

/// Full-scale raw value of the controller's analog sensors
pub const SENSOR_FULL_SCALE: f64 = 1024.0;

/// Map raw soil moisture (0..=1024) to a wetness percentage in [0, 100]
pub fn soil_moisture_percent(raw: i32) -> f64 {
    inverted_percent(raw)
}

/// Map a raw light level (0..=1024) to a brightness percentage in [0, 100]
pub fn light_percent(raw: i32) -> f64 {
    inverted_percent(raw)
}

fn inverted_percent(raw: i32) -> f64 {
    (100.0 - f64::from(raw) / SENSOR_FULL_SCALE * 100.0).clamp(0.0, 100.0)
}

/// Low/high boundaries of the optimal band for one metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

impl Thresholds {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Classify a value; both boundaries belong to the optimal band
    pub fn classify(&self, value: f64) -> Band {
        if value < self.low {
            Band::Low
        } else if value > self.high {
            Band::High
        } else {
            Band::Optimal
        }
    }
}

/// Air temperature in °C
pub const TEMPERATURE: Thresholds = Thresholds::new(18.0, 35.0);

/// Relative humidity in %
pub const HUMIDITY: Thresholds = Thresholds::new(30.0, 80.0);

/// Soil wetness in % (after [`soil_moisture_percent`])
pub const SOIL_MOISTURE: Thresholds = Thresholds::new(30.0, 50.0);

/// Three-way status of a metric relative to its thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Low,
    Optimal,
    High,
}

/// Metrics that carry a status band on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Humidity,
    SoilMoisture,
}

impl Metric {
    pub fn thresholds(self) -> Thresholds {
        match self {
            Metric::Temperature => TEMPERATURE,
            Metric::Humidity => HUMIDITY,
            Metric::SoilMoisture => SOIL_MOISTURE,
        }
    }

    pub fn classify(self, value: f64) -> Band {
        self.thresholds().classify(value)
    }

    /// Human-readable status text for a band of this metric
    pub fn label(self, band: Band) -> &'static str {
        match (self, band) {
            (Metric::SoilMoisture, Band::Low) => "Dry",
            (Metric::SoilMoisture, Band::Optimal) => "Moist",
            (Metric::SoilMoisture, Band::High) => "Wet",
            (_, Band::Low) => "Low",
            (_, Band::Optimal) => "Optimal",
            (_, Band::High) => "High",
        }
    }

    /// Classify and label in one step
    pub fn status(self, value: f64) -> &'static str {
        self.label(self.classify(value))
    }
}

/// Status text for the rain sensor
pub fn rain_label(rain_drop: u8) -> &'static str {
    if rain_drop == 0 {
        "No Rain"
    } else {
        "Rain Detected"
    }
}
