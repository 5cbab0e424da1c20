use serde::{Deserialize, Serialize};

/// The envelope every JSON endpoint responds with.
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub result: T,
}
