//! Resolution of the `point=...` query used by the route and matrix personas.

use reqwest::Method;
use serde_json::Value;

use crate::errors::TaskError;
use crate::geo::BoundingBox;
use crate::outcome::{OutcomeSink, RequestOutcome, LABEL_INFO};
use crate::requests::ApiTarget;

/// `point=<lat>,<lon>` repeated `num_points` times, joined by `&`.
pub fn build_points_query(lat: f64, lon: f64, num_points: usize) -> String {
    vec![format!("point={},{}", lat, lon); num_points].join("&")
}

/// Extract the bounding box from an `/info` body.
pub fn parse_info_bbox(body: &str) -> Result<BoundingBox, TaskError> {
    let data: Value = serde_json::from_str(body)
        .map_err(|e| TaskError::Protocol(format!("Info failed: {}", e)))?;

    let values: Option<Vec<f64>> = data
        .get("bbox")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_f64).collect());

    values
        .as_deref()
        .and_then(BoundingBox::from_slice)
        .ok_or_else(|| TaskError::Protocol(format!("No bounding box in info: {}", data)))
}

/// The override when configured, otherwise the bounding-box center from
/// `/info` repeated `num_points` times.
///
/// The `/info` call is recorded as one outcome labeled "Info".
pub async fn resolve_points_query(
    target: &ApiTarget,
    sink: &OutcomeSink,
    override_query: Option<&str>,
    num_points: usize,
) -> Result<String, TaskError> {
    if let Some(query) = override_query {
        return Ok(query.to_string());
    }

    let request = target
        .client
        .get(target.url("/info"))
        .header("content-type", "application/json");
    let (latency, result) = target.send(request, target.timeout).await;

    let parsed = result.and_then(|reply| {
        if !reply.is_success() {
            return Err(TaskError::Status {
                status: reply.status,
                message: reply.error_message(),
            });
        }
        parse_info_bbox(&reply.body).map(|bbox| (reply.status, bbox))
    });

    match parsed {
        Ok((status, bbox)) => {
            sink.record(RequestOutcome::success(LABEL_INFO, Method::GET, latency, status));
            let (lat, lon) = bbox.generation_center();
            Ok(build_points_query(lat, lon, num_points))
        }
        Err(error) => {
            let status = match &error {
                TaskError::Status { status, .. } => Some(*status),
                _ => None,
            };
            sink.record(RequestOutcome::failure(
                LABEL_INFO,
                Method::GET,
                latency,
                status,
                error.clone(),
            ));
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_points_query() {
        assert_eq!(
            build_points_query(52.55, 13.25, 3),
            "point=52.55,13.25&point=52.55,13.25&point=52.55,13.25"
        );
        assert_eq!(build_points_query(1.5, 2.5, 1), "point=1.5,2.5");
    }

    #[test]
    fn test_midpoint_query_end_to_end() {
        let bbox = parse_info_bbox(r#"{"bbox":[13.0,52.5,13.5,52.6],"version":"9"}"#).unwrap();
        let (lat, lon) = bbox.generation_center();
        assert_eq!(
            build_points_query(lat, lon, 3),
            "point=52.55,13.25&point=52.55,13.25&point=52.55,13.25"
        );
    }

    #[test]
    fn test_parse_info_errors() {
        assert!(matches!(
            parse_info_bbox("not json"),
            Err(TaskError::Protocol(m)) if m.starts_with("Info failed")
        ));
        assert!(matches!(
            parse_info_bbox(r#"{"version":"9"}"#),
            Err(TaskError::Protocol(m)) if m.starts_with("No bounding box")
        ));
        assert!(parse_info_bbox(r#"{"bbox":[1.0,2.0]}"#).is_err());
    }
}
