use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};
use tracing::{debug, instrument};

use crate::{
    connector::ForecastSource,
    error::WeatherError,
    model::{ForecastReport, Moment, WaForecastResponse},
};

/// Fetches provider data and turns it into something a user can read.
#[async_trait]
pub trait Transformer: Send + Sync + Debug {
    type Data: Send;
    type Output;

    async fn get_data(&self, latitude: f64, longitude: f64) -> Result<Self::Data, WeatherError>;

    fn transform(&self, data: &Self::Data, moment: Moment) -> Self::Output;
}

/// Renders WeatherAPI.com forecasts as plain-text reports.
#[derive(Debug, Clone)]
pub struct WeatherTransformer {
    source: Arc<dyn ForecastSource>,
}

impl WeatherTransformer {
    pub fn new(source: Arc<dyn ForecastSource>) -> Self {
        Self { source }
    }

    /// Fetch a fresh forecast for the coordinates and format it for `moment`.
    #[instrument(skip(self))]
    pub async fn render(
        &self,
        latitude: f64,
        longitude: f64,
        moment: Moment,
    ) -> Result<String, WeatherError> {
        let report = self.get_data(latitude, longitude).await?;
        debug!(location = %report.location_name, "Forecast fetched");
        Ok(self.transform(&report, moment))
    }

    /// Like [`render`](Self::render), for a moment given by name.
    ///
    /// An unknown name fails before the provider is contacted.
    pub async fn render_named(
        &self,
        latitude: f64,
        longitude: f64,
        moment: &str,
    ) -> Result<String, WeatherError> {
        let moment: Moment = moment.parse()?;
        self.render(latitude, longitude, moment).await
    }
}

#[async_trait]
impl Transformer for WeatherTransformer {
    type Data = ForecastReport;
    type Output = String;

    async fn get_data(&self, latitude: f64, longitude: f64) -> Result<ForecastReport, WeatherError> {
        validate_coordinates(latitude, longitude)?;

        let raw = self.source.fetch_forecast(&format!("{latitude},{longitude}")).await?;
        let parsed: WaForecastResponse = serde_json::from_value(raw)
            .map_err(|e| WeatherError::MalformedResponse(e.to_string()))?;

        ForecastReport::try_from(parsed)
    }

    fn transform(&self, report: &ForecastReport, moment: Moment) -> String {
        match moment {
            Moment::Current => current_block(report),
            Moment::Forecast => forecast_block(report),
            Moment::Full => format!("{}\n\n{}", current_block(report), forecast_block(report)),
        }
    }
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), WeatherError> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(WeatherError::invalid_coordinates(latitude, longitude));
    }
    Ok(())
}

// Temperatures use `{:?}` so whole values keep their decimal point (`9.0`).
fn current_block(report: &ForecastReport) -> String {
    let now = &report.current;
    format!(
        "{} at the moment in {}\nWith a temperature of {:?}°c\nAnd it feels like {:?}°c",
        now.condition, report.location_name, now.temperature_c, now.feels_like_c
    )
}

fn forecast_block(report: &ForecastReport) -> String {
    let day = &report.tomorrow;
    format!(
        "{} for tomorrow in {}\nWith a Max temperature of {:?}°c and Min of {:?}°c\nSunrise at {} and Sunset at {}",
        day.condition,
        report.location_name,
        day.max_temperature_c,
        day.min_temperature_c,
        day.sunrise,
        day.sunset
    )
}
