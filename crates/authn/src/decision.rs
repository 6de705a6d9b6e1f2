//! Access decision documents.
//!
//! The gateway admits a connection only when the authorizer returns a policy
//! document allowing `execute-api:Invoke` on the invoked API. The wire shape:
//!
//! ```json
//! {
//!   "principalId": "user-1",
//!   "policyDocument": {
//!     "Version": "2012-10-17",
//!     "Statement": [{ "Action": "execute-api:Invoke", "Effect": "Allow",
//!                     "Resource": "arn:aws:execute-api:eu-west-1:123456789012:abc123/*" }]
//!   },
//!   "context": { "scope": "chat:write" }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::authenticator::AuthenticationResult;

/// Policy language version understood by the gateway.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Action granted to an admitted connection.
pub const INVOKE_ACTION: &str = "execute-api:Invoke";

/// Effect of a policy statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Permit the action.
    Allow,
    /// Refuse the action.
    Deny,
}

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Granted action.
    pub action: String,
    /// Allow or deny.
    pub effect: Effect,
    /// Resource the statement applies to.
    pub resource: String,
}

/// Policy attached to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version.
    pub version: String,
    /// Statements, evaluated by the gateway.
    pub statement: Vec<Statement>,
}

/// Metadata the gateway forwards to downstream route handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionContext {
    /// Scope granted by the token.
    pub scope: String,
}

/// Authorizer response admitting a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionDocument {
    /// Authenticated subject.
    pub principal_id: String,
    /// Policy granting invoke on the API.
    pub policy_document: PolicyDocument,
    /// Forwarded metadata.
    pub context: DecisionContext,
}

/// Converts an authentication outcome into a decision document.
///
/// `Allow` yields a document permitting invoke on every route of the invoked
/// API; `Deny` yields `None` and the caller rejects the handshake.
#[must_use]
pub fn to_decision_document(result: &AuthenticationResult) -> Option<DecisionDocument> {
    let principal = result.principal()?;
    Some(DecisionDocument {
        principal_id: principal.principal_id.clone(),
        policy_document: PolicyDocument {
            version: POLICY_VERSION.to_owned(),
            statement: vec![Statement {
                action: INVOKE_ACTION.to_owned(),
                effect: Effect::Allow,
                resource: principal.resource.clone(),
            }],
        },
        context: DecisionContext { scope: principal.scope.clone() },
    })
}
