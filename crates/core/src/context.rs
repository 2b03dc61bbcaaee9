//! Situational context injected into the outgoing copy of a user turn.

use std::fmt::{self, Display};

const INSTRUCTION: &str = "[INSTRUCTION: Please reply in the same language \
    as the user's input message below. If an image is provided in the \
    message, please analyze it. Use Markdown formatting for better \
    readability (headings, lists, bold text, tables if applicable). If the \
    user requests a specific format (e.g., table, steps, list), strictly \
    follow that format.]";

/// An ephemeral prefix for the latest user turn.
///
/// The annotation is only ever part of the request sent upstream. It is
/// never persisted and never shown back to the user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ContextAnnotation(String);

impl ContextAnnotation {
    /// Creates an annotation from raw text.
    #[inline]
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self(text.into())
    }

    /// Returns the annotation text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if there is nothing to inject.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds the outgoing content of a user turn.
    pub fn annotate(&self, content: &str) -> String {
        if self.is_empty() {
            return content.to_owned();
        }
        format!("{}\n\n{}", self.0, content)
    }
}

impl Display for ContextAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot of the farmer's location and current weather.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocationContext {
    /// City, town or village name.
    pub city: String,
    /// Temperature in degrees Celsius, rounded.
    pub temperature: i32,
    /// Readable weather condition.
    pub condition: String,
    /// Relative humidity in percent.
    pub humidity: u8,
}

impl Default for LocationContext {
    fn default() -> Self {
        Self {
            city: "Unknown".to_owned(),
            temperature: 0,
            condition: "Unknown".to_owned(),
            humidity: 0,
        }
    }
}

impl LocationContext {
    /// Creates a snapshot from raw weather readings.
    ///
    /// `weather_code` is a WMO weather interpretation code.
    pub fn from_readings<S: Into<String>>(
        city: S,
        temperature: f64,
        weather_code: u8,
        humidity: u8,
    ) -> Self {
        Self {
            city: city.into(),
            temperature: temperature.round() as i32,
            condition: weather_condition(weather_code).to_owned(),
            humidity,
        }
    }

    /// Renders the annotation for this snapshot.
    pub fn annotation(&self) -> ContextAnnotation {
        ContextAnnotation(format!(
            "[LOCATION CONTEXT: Location: {}, Temperature: {}°C, Weather: {}, \
             Humidity: {}%]\n{INSTRUCTION}",
            self.city, self.temperature, self.condition, self.humidity
        ))
    }
}

/// Converts a WMO weather interpretation code to a readable condition.
pub fn weather_condition(code: u8) -> &'static str {
    match code {
        0 => "Clear Sky",
        1 | 2 => "Partly Cloudy",
        3 => "Overcast",
        45 | 48 => "Foggy",
        51 | 53 | 55 => "Light Drizzle",
        61 | 63 | 65 => "Rain",
        71 | 73 | 75 => "Snow",
        77 => "Snow Grains",
        80..=82 => "Rain Showers",
        85 | 86 => "Snow Showers",
        95 | 96 | 99 => "Thunderstorm",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation() {
        let location = LocationContext::from_readings("Nashik", 27.6, 61, 74);
        let annotation = location.annotation();
        assert!(annotation.as_str().starts_with(
            "[LOCATION CONTEXT: Location: Nashik, Temperature: 28°C, \
             Weather: Rain, Humidity: 74%]\n[INSTRUCTION:"
        ));

        let content = annotation.annotate("Which crop now?");
        assert!(content.starts_with("[LOCATION CONTEXT:"));
        assert!(content.ends_with("]\n\nWhich crop now?"));
    }

    #[test]
    fn test_unknown_location() {
        let annotation = LocationContext::default().annotation();
        assert!(annotation.as_str().starts_with(
            "[LOCATION CONTEXT: Location: Unknown, Temperature: 0°C, \
             Weather: Unknown, Humidity: 0%]"
        ));
    }

    #[test]
    fn test_empty_annotation() {
        assert_eq!(ContextAnnotation::default().annotate("hi"), "hi");
    }

    #[test]
    fn test_weather_condition() {
        assert_eq!(weather_condition(0), "Clear Sky");
        assert_eq!(weather_condition(2), "Partly Cloudy");
        assert_eq!(weather_condition(81), "Rain Showers");
        assert_eq!(weather_condition(99), "Thunderstorm");
        assert_eq!(weather_condition(42), "Unknown");
    }
}
