use serde::Deserialize;
use std::{fmt, str::FromStr};

use crate::error::WeatherError;

/// A chat that shared its location and/or opted into daily reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub chat_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub agreement: bool,
    pub subscription: bool,
    pub active: bool,
}

impl Subscriber {
    /// A consenting, subscribed and active chat at the given coordinates.
    pub fn subscribed(chat_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            chat_id: chat_id.into(),
            latitude: Some(latitude),
            longitude: Some(longitude),
            agreement: true,
            subscription: true,
            active: true,
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// A subscription needs both coordinates and consent.
    pub fn validate(&self) -> Result<(), String> {
        if self.subscription && self.coordinates().is_none() {
            return Err("subscription requires latitude and longitude".to_string());
        }
        if self.subscription && !self.agreement {
            return Err("subscription requires storage agreement".to_string());
        }
        Ok(())
    }
}

/// Which time window a rendered report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Moment {
    Current,
    Forecast,
    Full,
}

impl Moment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Moment::Current => "current",
            Moment::Forecast => "forecast",
            Moment::Full => "full",
        }
    }

    pub const fn all() -> &'static [Moment] {
        &[Moment::Current, Moment::Forecast, Moment::Full]
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Moment {
    type Err = WeatherError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "current" => Ok(Moment::Current),
            "forecast" => Ok(Moment::Forecast),
            "full" => Ok(Moment::Full),
            _ => Err(WeatherError::UnsupportedMoment(value.to_string())),
        }
    }
}

// Provider payload, trimmed to the fields the reports need.

#[derive(Debug, Clone, Deserialize)]
pub struct WaLocation {
    pub name: String,
    pub tz_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaCondition {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaCurrent {
    pub temp_c: f64,
    pub feelslike_c: f64,
    pub condition: WaCondition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaAstro {
    pub sunrise: String,
    pub sunset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaDay {
    pub maxtemp_c: f64,
    pub mintemp_c: f64,
    pub condition: WaCondition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaForecastDay {
    pub astro: WaAstro,
    pub day: WaDay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaForecast {
    pub forecastday: Vec<WaForecastDay>,
}

/// Body of `forecast.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct WaForecastResponse {
    pub location: WaLocation,
    pub current: WaCurrent,
    pub forecast: WaForecast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrentConditions {
    pub condition: String,
    pub temperature_c: f64,
    pub feels_like_c: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayForecast {
    pub condition: String,
    pub max_temperature_c: f64,
    pub min_temperature_c: f64,
    pub sunrise: String,
    pub sunset: String,
}

/// Everything a report can show, taken from a single provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastReport {
    pub location_name: String,
    pub timezone: String,
    pub current: CurrentConditions,
    pub tomorrow: DayForecast,
}

impl TryFrom<WaForecastResponse> for ForecastReport {
    type Error = WeatherError;

    fn try_from(mut parsed: WaForecastResponse) -> Result<Self, Self::Error> {
        let days = parsed.forecast.forecastday.len();
        if days < 2 {
            return Err(WeatherError::MalformedResponse(format!(
                "expected 2 forecast days, got {days}"
            )));
        }
        // Only today and tomorrow are requested; anything past index 1 is ignored.
        let tomorrow = parsed.forecast.forecastday.swap_remove(1);

        Ok(ForecastReport {
            location_name: parsed.location.name,
            timezone: parsed.location.tz_id,
            current: CurrentConditions {
                condition: parsed.current.condition.text,
                temperature_c: parsed.current.temp_c,
                feels_like_c: parsed.current.feelslike_c,
            },
            tomorrow: DayForecast {
                condition: tomorrow.day.condition.text,
                max_temperature_c: tomorrow.day.maxtemp_c,
                min_temperature_c: tomorrow.day.mintemp_c,
                sunrise: tomorrow.astro.sunrise,
                sunset: tomorrow.astro.sunset,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moment_as_str_roundtrip() {
        for moment in Moment::all() {
            let parsed: Moment = moment.as_str().parse().expect("roundtrip should succeed");
            assert_eq!(*moment, parsed);
        }
    }

    #[test]
    fn moment_parse_is_case_insensitive() {
        assert_eq!("FULL".parse::<Moment>().unwrap(), Moment::Full);
        assert_eq!(" Current ".parse::<Moment>().unwrap(), Moment::Current);
    }

    #[test]
    fn unknown_moment_error() {
        let err = "yesterday".parse::<Moment>().unwrap_err();
        assert!(matches!(err, WeatherError::UnsupportedMoment(ref m) if m == "yesterday"));
        assert!("".parse::<Moment>().is_err());
    }

    #[test]
    fn subscription_without_coordinates_is_invalid() {
        let mut sub = Subscriber::subscribed("42", 1.0, 2.0);
        assert!(sub.validate().is_ok());

        sub.latitude = None;
        assert!(sub.validate().unwrap_err().contains("latitude"));
    }

    #[test]
    fn subscription_without_agreement_is_invalid() {
        let mut sub = Subscriber::subscribed("42", 1.0, 2.0);
        sub.agreement = false;
        assert!(sub.validate().unwrap_err().contains("agreement"));

        sub.subscription = false;
        assert!(sub.validate().is_ok());
    }

    fn day(condition: &str) -> WaForecastDay {
        WaForecastDay {
            astro: WaAstro { sunrise: "06:00 AM".into(), sunset: "08:00 PM".into() },
            day: WaDay {
                maxtemp_c: 20.0,
                mintemp_c: 10.0,
                condition: WaCondition { text: condition.into() },
            },
        }
    }

    fn response(days: Vec<WaForecastDay>) -> WaForecastResponse {
        WaForecastResponse {
            location: WaLocation { name: "Ghent".into(), tz_id: "Europe/Brussels".into() },
            current: WaCurrent {
                temp_c: 15.0,
                feelslike_c: 14.0,
                condition: WaCondition { text: "Sunny".into() },
            },
            forecast: WaForecast { forecastday: days },
        }
    }

    #[test]
    fn report_uses_second_day_as_tomorrow() {
        let report = ForecastReport::try_from(response(vec![day("Today"), day("Tomorrow")]))
            .expect("two days are enough");
        assert_eq!(report.tomorrow.condition, "Tomorrow");
        assert_eq!(report.location_name, "Ghent");
        assert_eq!(report.timezone, "Europe/Brussels");
    }

    #[test]
    fn report_with_single_day_is_malformed() {
        let err = ForecastReport::try_from(response(vec![day("Today")])).unwrap_err();
        assert!(matches!(err, WeatherError::MalformedResponse(_)));
    }
}
