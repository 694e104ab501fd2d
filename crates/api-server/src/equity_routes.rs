use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, routing::post, Extension, Json, Router};
use chrono::{NaiveDate, TimeDelta, Utc};
use perf_core::{normalize_ticker, PricePanel};
use performance_engine::{EquityCalculator, EquityMetrics};
use serde::{Deserialize, Serialize};

use crate::auth::VerifiedUser;
use crate::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct EquityRequest {
    /// Ticker → number of shares held
    pub positions: BTreeMap<String, f64>,
    pub lookback_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EquityResponse {
    pub uid: String,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
    /// Serialized as `{}` when there is nothing to measure
    #[serde(serialize_with = "metrics_or_empty")]
    pub metrics: Option<EquityMetrics>,
    pub skipped: Vec<String>,
}

fn metrics_or_empty<S: serde::Serializer>(
    metrics: &Option<EquityMetrics>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match metrics {
        Some(m) => m.serialize(serializer),
        None => serde_json::Map::new().serialize(serializer),
    }
}

/// Longest history a client may request, in calendar days.
pub const MAX_LOOKBACK_DAYS: i64 = 36_500;

pub fn equity_routes() -> Router<AppState> {
    Router::new().route("/portfolio/equity", post(portfolio_equity))
}

fn validate(request: &EquityRequest) -> Result<(), AppError> {
    if let Some((ticker, shares)) = request
        .positions
        .iter()
        .find(|(_, s)| !s.is_finite() || **s < 0.0)
    {
        return Err(AppError::with_status(
            StatusCode::BAD_REQUEST,
            anyhow::anyhow!("invalid share count {} for {}", shares, ticker),
        ));
    }
    if matches!(request.lookback_days, Some(days) if days <= 0 || days > MAX_LOOKBACK_DAYS) {
        return Err(AppError::with_status(
            StatusCode::BAD_REQUEST,
            anyhow::anyhow!("lookback_days must be between 1 and {}", MAX_LOOKBACK_DAYS),
        ));
    }
    Ok(())
}

/// First day of a `lookback`-day window ending at `to`.
fn window_start(to: NaiveDate, lookback: i64) -> Result<NaiveDate, AppError> {
    TimeDelta::try_days(lookback)
        .and_then(|span| to.checked_sub_signed(span))
        .ok_or_else(|| {
            AppError::with_status(
                StatusCode::BAD_REQUEST,
                anyhow::anyhow!("lookback of {} days is out of range", lookback),
            )
        })
}

async fn portfolio_equity(
    State(state): State<AppState>,
    Extension(user): Extension<VerifiedUser>,
    Json(request): Json<EquityRequest>,
) -> Result<Json<EquityResponse>, AppError> {
    validate(&request)?;

    let tickers: Vec<String> = request
        .positions
        .iter()
        .filter(|(_, shares)| **shares > 0.0)
        .map(|(ticker, _)| normalize_ticker(ticker))
        .filter(|t| !t.is_empty())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    if tickers.is_empty() {
        return Ok(Json(EquityResponse {
            uid: user.uid,
            dates: Vec::new(),
            values: Vec::new(),
            metrics: None,
            skipped: Vec::new(),
        }));
    }

    let lookback = request
        .lookback_days
        .unwrap_or(state.config.default_lookback_days);
    let to = Utc::now().date_naive();
    let from = window_start(to, lookback)?;

    tracing::info!(
        "Equity curve for {}: {} position(s), {} to {}",
        user.uid,
        tickers.len(),
        from,
        to
    );

    let fetches = match tokio::time::timeout(
        state.config.fetch_timeout,
        state.price_source.fetch_closes(&tickers, from, to),
    )
    .await
    {
        Ok(Ok(fetches)) => fetches,
        Ok(Err(e)) => {
            tracing::error!("Price fetch from {} failed: {}", state.price_source.name(), e);
            return Err(AppError::with_status(
                StatusCode::BAD_GATEWAY,
                anyhow::anyhow!("price data unavailable: {}", e),
            ));
        }
        Err(_) => {
            tracing::error!(
                "Price fetch from {} timed out after {:?}",
                state.price_source.name(),
                state.config.fetch_timeout
            );
            return Err(AppError::with_status(
                StatusCode::BAD_GATEWAY,
                anyhow::anyhow!("price data request timed out"),
            ));
        }
    };

    let (panel, unavailable) = PricePanel::from_fetches(fetches);
    for ticker in &unavailable {
        tracing::debug!("{} unavailable: {}", ticker.ticker, ticker.reason);
    }

    let curve = EquityCalculator::compute(&request.positions, &panel);
    Ok(Json(EquityResponse {
        uid: user.uid,
        dates: curve.dates,
        values: curve.values,
        metrics: curve.metrics,
        skipped: curve.skipped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(positions: &[(&str, f64)], lookback_days: Option<i64>) -> EquityRequest {
        EquityRequest {
            positions: positions
                .iter()
                .map(|(t, s)| (t.to_string(), *s))
                .collect(),
            lookback_days,
        }
    }

    #[test]
    fn test_validate_rejects_bad_shares() {
        assert!(validate(&request(&[("AAA", 10.0), ("BBB", 0.0)], None)).is_ok());
        assert_eq!(
            validate(&request(&[("AAA", -1.0)], None)).unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            validate(&request(&[("AAA", f64::INFINITY)], None))
                .unwrap_err()
                .status,
            StatusCode::BAD_REQUEST
        );
        assert!(validate(&request(&[("AAA", 1.0)], Some(0))).is_err());
        assert!(validate(&request(&[("AAA", 1.0)], Some(MAX_LOOKBACK_DAYS))).is_ok());
        assert_eq!(
            validate(&request(&[("AAA", 1.0)], Some(i64::MAX)))
                .unwrap_err()
                .status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_window_start() {
        let to = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            window_start(to, 29).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
        );
        assert!(window_start(to, i64::MAX).is_err());
        assert!(window_start(to, 200_000_000).is_err());
    }

    #[test]
    fn test_empty_metrics_serialize_as_object() {
        let response = EquityResponse {
            uid: "u1".to_string(),
            dates: Vec::new(),
            values: Vec::new(),
            metrics: None,
            skipped: Vec::new(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["metrics"], serde_json::json!({}));
        assert_eq!(value["dates"], serde_json::json!([]));
    }
}
