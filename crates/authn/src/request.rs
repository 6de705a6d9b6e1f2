//! Inbound handshake request.
//!
//! The gateway invokes the authorizer with a JSON event. Only the fields the
//! authorizer reads are modelled; everything else is ignored.
//!
//! ```json
//! {
//!   "type": "REQUEST",
//!   "methodArn": "arn:aws:execute-api:eu-west-1:123456789012:abc123/production/$connect",
//!   "queryStringParameters": { "auth": "<token>" },
//!   "requestContext": { "domainName": "abc123.execute-api.eu-west-1.amazonaws.com",
//!                       "stage": "production", "connectionId": "L0SM9cOFvHcCIhw=" }
//! }
//! ```

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Invocation type the authorizer accepts.
pub const REQUEST_INVOCATION_TYPE: &str = "REQUEST";

/// Query parameter carrying the bearer token.
pub const TOKEN_QUERY_PARAMETER: &str = "auth";

/// A handshake authorization request as delivered by the gateway.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    /// Invocation type discriminator.
    #[serde(rename = "type", default)]
    pub invocation_type: Option<String>,

    /// ARN of the route being invoked.
    #[serde(default)]
    pub method_arn: Option<String>,

    /// Query string of the upgrade request.
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,

    /// Routing metadata.
    #[serde(default)]
    pub request_context: Option<RequestContext>,
}

// Hand-written so the query string (which holds the token) is never printed.
impl fmt::Debug for HandshakeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeRequest")
            .field("invocation_type", &self.invocation_type)
            .field("method_arn", &self.method_arn)
            .field(
                "query_string_parameters",
                &self.query_string_parameters.as_ref().map(|q| q.keys().collect::<Vec<_>>()),
            )
            .field("request_context", &self.request_context)
            .finish()
    }
}

/// Routing metadata attached to a gateway event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Public domain of the API.
    #[serde(default)]
    pub domain_name: Option<String>,
    /// Deployment stage.
    #[serde(default)]
    pub stage: Option<String>,
    /// Gateway-assigned connection identifier.
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Route being invoked (`$connect`, `$default`, ...).
    #[serde(default)]
    pub route_key: Option<String>,
    /// API identifier.
    #[serde(default)]
    pub api_id: Option<String>,
}

impl HandshakeRequest {
    /// Parses a raw gateway event.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedRequest`] if the event is not a JSON
    /// object of the expected shape.
    pub fn from_value(event: serde_json::Value) -> Result<Self> {
        serde_json::from_value(event)
            .map_err(|e| AuthError::malformed_request(format!("unrecognised event: {e}")))
    }

    /// Parses a raw gateway event from bytes.
    ///
    /// # Errors
    ///
    /// Same as [`from_value`](Self::from_value).
    pub fn from_slice(event: &[u8]) -> Result<Self> {
        serde_json::from_slice(event)
            .map_err(|e| AuthError::malformed_request(format!("unrecognised event: {e}")))
    }

    /// Checks the invocation type.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedRequest`] unless `type` is `REQUEST`.
    pub fn ensure_handshake(&self) -> Result<()> {
        match self.invocation_type.as_deref() {
            Some(REQUEST_INVOCATION_TYPE) => Ok(()),
            Some(other) => Err(AuthError::malformed_request(format!(
                "expected invocation type {REQUEST_INVOCATION_TYPE}, got {}",
                other.chars().take(32).collect::<String>()
            ))),
            None => Err(AuthError::malformed_request("missing invocation type")),
        }
    }

    /// Returns the bearer token from the `auth` query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingToken`] if the parameter is absent or empty.
    pub fn token(&self) -> Result<&str> {
        self.query_string_parameters
            .as_ref()
            .and_then(|q| q.get(TOKEN_QUERY_PARAMETER))
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(AuthError::missing_token)
    }

    /// Parses the method ARN.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedRequest`] if `methodArn` is absent or
    /// not an execute-api ARN.
    pub fn method_arn(&self) -> Result<MethodArn> {
        let raw = self
            .method_arn
            .as_deref()
            .ok_or_else(|| AuthError::malformed_request("missing methodArn"))?;
        MethodArn::parse(raw)
    }

    /// Connection identifier from the routing metadata, if present.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.request_context.as_ref().and_then(|c| c.connection_id.as_deref())
    }
}

/// A parsed `arn:<partition>:execute-api:<region>:<account>:<api-id>/<stage>/<route>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodArn {
    partition: String,
    region: String,
    account: String,
    api_id: String,
    stage: String,
    route: String,
}

impl MethodArn {
    /// Parses a method ARN.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedRequest`] if the ARN does not have the
    /// execute-api shape.
    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = || AuthError::malformed_request("methodArn is not an execute-api ARN");

        let mut fields = raw.splitn(6, ':');
        let (Some("arn"), Some(partition), Some("execute-api"), Some(region), Some(account), Some(path)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(malformed());
        };

        let mut segments = path.splitn(3, '/');
        let (Some(api_id), Some(stage), route) = (segments.next(), segments.next(), segments.next())
        else {
            return Err(malformed());
        };

        if [partition, region, account, api_id, stage].iter().any(|s| s.is_empty()) {
            return Err(malformed());
        }

        Ok(Self {
            partition: partition.to_owned(),
            region: region.to_owned(),
            account: account.to_owned(),
            api_id: api_id.to_owned(),
            stage: stage.to_owned(),
            route: route.unwrap_or_default().to_owned(),
        })
    }

    /// Region of the invoked API.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Account owning the API.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// API identifier.
    #[must_use]
    pub fn api_id(&self) -> &str {
        &self.api_id
    }

    /// Deployment stage.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Route key.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Every stage and route of the invoked API: `arn:...:<api-id>/*`.
    #[must_use]
    pub fn execution_resource_wildcard(&self) -> String {
        format!(
            "arn:{}:execute-api:{}:{}:{}/*",
            self.partition, self.region, self.account, self.api_id
        )
    }
}

impl fmt::Display for MethodArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:execute-api:{}:{}:{}/{}/{}",
            self.partition, self.region, self.account, self.api_id, self.stage, self.route
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::assert_auth_error;

    const ARN: &str = "arn:aws:execute-api:eu-west-1:123456789012:abc123/production/$connect";

    #[test]
    fn test_parse_gateway_event() {
        let request = HandshakeRequest::from_value(json!({
            "type": "REQUEST",
            "methodArn": ARN,
            "queryStringParameters": { "auth": "tok" },
            "requestContext": {
                "domainName": "abc123.execute-api.eu-west-1.amazonaws.com",
                "stage": "production",
                "connectionId": "L0SM9cOFvHcCIhw=",
                "routeKey": "$connect",
                "eventType": "CONNECT"
            },
            "headers": { "Host": "abc123.execute-api.eu-west-1.amazonaws.com" }
        }))
        .unwrap();

        request.ensure_handshake().unwrap();
        assert_eq!(request.token().unwrap(), "tok");
        assert_eq!(request.connection_id(), Some("L0SM9cOFvHcCIhw="));
        assert_eq!(request.method_arn().unwrap().stage(), "production");
    }

    #[rstest]
    #[case::token_type(json!({"type": "TOKEN"}))]
    #[case::missing_type(json!({}))]
    fn test_ensure_handshake_rejects(#[case] event: serde_json::Value) {
        let request = HandshakeRequest::from_value(event).unwrap();
        assert_auth_error!(request.ensure_handshake(), MalformedRequest);
    }

    #[test]
    fn test_non_object_event_is_malformed() {
        assert_auth_error!(HandshakeRequest::from_value(json!("REQUEST")), MalformedRequest);
        assert_auth_error!(HandshakeRequest::from_slice(b"not json"), MalformedRequest);
    }

    #[rstest]
    #[case::no_query(json!({"type": "REQUEST"}))]
    #[case::no_auth(json!({"type": "REQUEST", "queryStringParameters": {"other": "x"}}))]
    #[case::empty_auth(json!({"type": "REQUEST", "queryStringParameters": {"auth": ""}}))]
    #[case::null_query(json!({"type": "REQUEST", "queryStringParameters": null}))]
    fn test_missing_token(#[case] event: serde_json::Value) {
        let request = HandshakeRequest::from_value(event).unwrap();
        assert_auth_error!(request.token(), MissingToken);
    }

    #[test]
    fn test_debug_hides_token() {
        let request = HandshakeRequest::from_value(json!({
            "type": "REQUEST",
            "queryStringParameters": { "auth": "secret-token-text" }
        }))
        .unwrap();
        let printed = format!("{request:?}");
        assert!(!printed.contains("secret-token-text"));
        assert!(printed.contains("auth"));
    }

    #[test]
    fn test_method_arn_parts() {
        let arn = MethodArn::parse(ARN).unwrap();
        assert_eq!(arn.region(), "eu-west-1");
        assert_eq!(arn.account(), "123456789012");
        assert_eq!(arn.api_id(), "abc123");
        assert_eq!(arn.stage(), "production");
        assert_eq!(arn.route(), "$connect");
        assert_eq!(arn.to_string(), ARN);
        assert_eq!(
            arn.execution_resource_wildcard(),
            "arn:aws:execute-api:eu-west-1:123456789012:abc123/*"
        );
    }

    #[rstest]
    #[case::empty("")]
    #[case::wrong_service("arn:aws:lambda:eu-west-1:123456789012:function/x")]
    #[case::no_stage("arn:aws:execute-api:eu-west-1:123456789012:abc123")]
    #[case::empty_region("arn:aws:execute-api::123456789012:abc123/production/$connect")]
    #[case::not_arn("urn:aws:execute-api:eu-west-1:123456789012:abc123/production/$connect")]
    fn test_method_arn_rejects(#[case] raw: &str) {
        assert_auth_error!(MethodArn::parse(raw), MalformedRequest);
    }
}
