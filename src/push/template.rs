use serde_json::{json, Value};

use crate::weather::WeatherRecord;

/// A push payload ready to hand to a `PushGateway` (spec.md 4.4/6): a
/// user-visible title/body plus a data map of the raw fields.
#[derive(Debug, Clone)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Build the notification payload for one region/record pair, with the
/// exact formatting spec.md 6 requires: temperature/precipitation/wind at
/// one decimal, humidity as an integer percent, `observed_at` as an
/// ISO-8601 timestamp with offset.
pub fn build_payload(region: &str, record: &WeatherRecord) -> PushPayload {
    let title = format!("날씨 알림 - {region}");
    let body = format!(
        "현재 {:.1}°C, 습도 {}%, 강수 {:.1}mm",
        record.temperature_c,
        record.humidity_pct.round() as i64,
        record.precipitation_mm,
    );

    let data = json!({
        "region": region,
        "temperature": format!("{:.1}", record.temperature_c),
        "humidity": record.humidity_pct.round() as i64,
        "precipitation": format!("{:.1}", record.precipitation_mm),
        "wind_speed": format!("{:.1}", record.wind_speed_mps),
        "timestamp": record.observed_at.to_rfc3339(),
    });

    PushPayload { title, body, data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn formats_title_and_body_per_the_exact_template() {
        let record = WeatherRecord {
            temperature_c: 25.5,
            humidity_pct: 60.0,
            precipitation_mm: 0.0,
            wind_speed_mps: 3.2,
            observed_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let payload = build_payload("서울시 강남구", &record);
        assert_eq!(payload.title, "날씨 알림 - 서울시 강남구");
        assert_eq!(payload.body, "현재 25.5°C, 습도 60%, 강수 0.0mm");
        assert_eq!(payload.data["temperature"], "25.5");
        assert_eq!(payload.data["wind_speed"], "3.2");
    }
}
