//! Alpaca parameter extractor.

use std::convert::Infallible;

use axum::extract::{FromRequest, Query, Request};
use axum::http::header::CONTENT_TYPE;
use axum::{async_trait, Form, Json};
use safetymonitor_protocol::ParamSource;
use serde_json::Value;

/// Query string plus form or JSON body of an Alpaca request.
///
/// Never rejects: unparseable parts are treated as absent, so validation
/// errors surface as Alpaca envelopes instead of framework errors. Must be
/// the last handler argument since it consumes the body.
#[derive(Debug, Clone, Default)]
pub struct AlpacaParams(pub ParamSource);

#[async_trait]
impl<S> FromRequest<S> for AlpacaParams
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let query = Query::<Vec<(String, String)>>::try_from_uri(req.uri())
            .map(|Query(pairs)| pairs)
            .unwrap_or_default();
        let params = ParamSource::new().with_query(query);

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let params = if content_type.starts_with("application/json") {
            match Json::<Value>::from_request(req, state).await {
                Ok(Json(Value::Object(map))) => params.with_json_body(map),
                _ => params,
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            match Form::<Vec<(String, String)>>::from_request(req, state).await {
                Ok(Form(pairs)) => params.with_form_body(pairs),
                Err(_) => params,
            }
        } else {
            params
        };

        Ok(AlpacaParams(params))
    }
}
