use axum::response::IntoResponse;

// axum handler for the root path; deliberately not part of the OpenAPI spec.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::root;
    use anyhow::Result;
    use axum::{body::to_bytes, response::IntoResponse};

    #[tokio::test]
    async fn root_returns_name_and_version() -> Result<()> {
        let response = root().await.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let text = String::from_utf8(body.to_vec())?;
        assert!(text.starts_with("gardisto/"));
        Ok(())
    }
}
