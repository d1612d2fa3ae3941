use serde::{Deserialize, Serialize};

/// JWT payload for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub id: String,    // user ID
    pub email: String, // user email
    pub name: String,  // display name
    pub iat: i64,      // issued at (unix timestamp)
    pub exp: i64,      // expires at (unix timestamp)
}
