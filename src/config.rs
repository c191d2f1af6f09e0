use std::env;

use chrono::Duration;

use crate::engine::matching::MatchPolicy;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub request_queue_size: usize,
    pub event_buffer_size: usize,
    pub search_radii_m: Vec<f64>,
    pub max_candidates: usize,
    pub offer_ttl_secs: i64,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            request_queue_size: parse_or_default("REQUEST_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            search_radii_m: parse_radii(
                env::var("SEARCH_RADII_M")
                    .unwrap_or_else(|_| "2000,5000,10000".to_string())
                    .as_str(),
            )?,
            max_candidates: parse_or_default("MAX_CANDIDATES", 20)?,
            offer_ttl_secs: parse_or_default("OFFER_TTL_SECS", 120)?,
            sweep_interval_secs: parse_or_default("SWEEP_INTERVAL_SECS", 15)?,
        })
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            radii_m: self.search_radii_m.clone(),
            max_candidates: self.max_candidates,
            offer_ttl: Duration::seconds(self.offer_ttl_secs),
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn parse_radii(raw: &str) -> Result<Vec<f64>, AppError> {
    let radii = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|err| AppError::Internal(format!("invalid SEARCH_RADII_M: {err}")))
        })
        .collect::<Result<Vec<f64>, AppError>>()?;

    if radii.is_empty() {
        return Err(AppError::Internal(
            "SEARCH_RADII_M must list at least one radius".to_string(),
        ));
    }
    let increasing = radii[0] > 0.0 && radii.windows(2).all(|pair| pair[0] < pair[1]);
    if !increasing {
        return Err(AppError::Internal(
            "SEARCH_RADII_M must be positive and strictly increasing".to_string(),
        ));
    }

    Ok(radii)
}

#[cfg(test)]
mod tests {
    use super::parse_radii;

    #[test]
    fn parses_comma_separated_radii() {
        let radii = parse_radii("2000, 5000,10000").unwrap();
        assert_eq!(radii, vec![2_000.0, 5_000.0, 10_000.0]);
    }

    #[test]
    fn rejects_non_increasing_radii() {
        assert!(parse_radii("5000,2000").is_err());
        assert!(parse_radii("0,2000").is_err());
        assert!(parse_radii("2000,abc").is_err());
    }
}
