// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `/ez` intake: decodes a stat from query or form parameters and hands it to the batcher.

use batchhat::batcher_service::BatcherHandle;
use batchhat::stat::{unix_now, Stat};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::{header, http, Method, Request, Response, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use tracing::{debug, error};

pub const EZ_ENDPOINT_PATH: &str = "/ez";
const MAX_FORM_LENGTH: usize = 64 * 1024;

type Params = Vec<(String, String)>;

pub async fn endpoint_handler(
    req: Request<Incoming>,
    batcher: BatcherHandle,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET | &Method::POST, EZ_ENDPOINT_PATH) => match read_params(req).await {
            Ok(params) => ez_handler(&params, &batcher),
            Err(msg) => error_response(&msg),
        },
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new())),
    };

    Ok(response.unwrap_or_else(|e| {
        error!("Failed to build response: {e}");
        let mut fallback = Response::new(Full::new(Bytes::new()));
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    }))
}

/// Collects query parameters followed by url-encoded form body parameters.
async fn read_params(req: Request<Incoming>) -> Result<Params, String> {
    let mut params: Params = match req.uri().query() {
        Some(query) => serde_urlencoded::from_str(query).map_err(|e| e.to_string())?,
        None => Vec::new(),
    };

    let is_form = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));

    if *req.method() == Method::POST && is_form {
        let body = Limited::new(req.into_body(), MAX_FORM_LENGTH)
            .collect()
            .await
            .map_err(|e| format!("couldn't read body: {e}"))?
            .to_bytes();
        let form: Params = serde_urlencoded::from_bytes(&body).map_err(|e| e.to_string())?;
        params.extend(form);
    }

    Ok(params)
}

pub fn ez_handler(
    params: &[(String, String)],
    batcher: &BatcherHandle,
) -> http::Result<Response<Full<Bytes>>> {
    let (ezkey, stat) = match decode_stat(params) {
        Ok(decoded) => decoded,
        Err(msg) => return error_response(&msg),
    };
    let account_key = ezkey.as_deref().unwrap_or(batcher.account_key());
    if account_key.is_empty() {
        return error_response("no ezkey specified");
    }

    if let Err(e) = batcher.submit(account_key, stat) {
        return error_response(&e.to_string());
    }

    debug!("Queued {} {} for {}", stat.kind, stat.name, account_key);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(
            json!({"status": 200, "msg": "ok"}).to_string(),
        )))
}

pub fn error_response(msg: &str) -> http::Result<Response<Full<Bytes>>> {
    error!("errored {msg}");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(
            json!({"status": 500, "msg": msg}).to_string(),
        )))
}

/// Decodes the optional ezkey and the stat described by `params`.
fn decode_stat(params: &[(String, String)]) -> Result<(Option<String>, Stat), String> {
    let ezkey = single_arg(params, "ezkey")?;
    let name = required_param(params, "stat")?;
    let count = float_param(params, "count")?;
    let value = float_param(params, "value")?;
    #[allow(clippy::cast_possible_truncation)]
    let timestamp = float_param(params, "t")?.map_or_else(unix_now, |t| t as i64);

    let stat = match (count, value) {
        (Some(count), _) => Stat::count(&name, count, timestamp),
        (None, Some(value)) => Stat::value(&name, value, timestamp),
        (None, None) => return Err("missing count or value".to_string()),
    };
    Ok((ezkey, stat))
}

/// An empty parameter is the same as an absent one. Repeating a parameter is an error.
fn single_arg(params: &[(String, String)], key: &str) -> Result<Option<String>, String> {
    let mut values = params.iter().filter(|(k, _)| k == key).map(|(_, v)| v);
    match (values.next(), values.next()) {
        (None, _) => Ok(None),
        (Some(_), Some(_)) => Err(format!("too many values for {key}")),
        (Some(v), None) if v.is_empty() => Ok(None),
        (Some(v), None) => Ok(Some(v.clone())),
    }
}

fn required_param(params: &[(String, String)], key: &str) -> Result<String, String> {
    single_arg(params, key)?.ok_or_else(|| format!("no {key} specified"))
}

/// `inf` and `NaN` parse as floats but have no JSON representation, so they are refused here.
fn float_param(params: &[(String, String)], key: &str) -> Result<Option<f64>, String> {
    single_arg(params, key)?
        .map(|v| match v.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(n),
            _ => Err("invalid number".to_string()),
        })
        .transpose()
}
