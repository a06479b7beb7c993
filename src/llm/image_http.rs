//! Image generation adapters
//!
//! Two response styles are common among hosted image generators:
//! - JSON "prediction" endpoints that answer with a URL
//! - form endpoints that answer with the image bytes themselves
//!
//! Both results are passed back as-is; nothing here downloads or re-encodes.

use super::http::{api_key_from_env, build_client, send_with_retry};
use super::{ImageRequest, ImageResult, LlmError, Provider};
use crate::config::{ImageBinaryBackend, ImageJsonBackend};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Adapter for endpoints that answer `{"<url_field>": "https://..."}`
pub struct ImageJsonProvider {
    name: String,
    client: reqwest::Client,
    url: String,
    model: Option<String>,
    api_key: Option<String>,
    url_field: String,
    extra: BTreeMap<String, String>,
    max_retries: u32,
}

impl ImageJsonProvider {
    pub fn from_config(name: &str, config: &ImageJsonBackend) -> Result<Self> {
        url::Url::parse(&config.url)
            .with_context(|| format!("Invalid url for backend '{}'", name))?;

        Ok(Self {
            name: name.to_string(),
            client: build_client(&config.http)?,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: api_key_from_env(config.api_key_env.as_deref())?,
            url_field: config.url_field.clone(),
            extra: config.extra.clone(),
            max_retries: config.http.max_retries,
        })
    }

    fn build_body(&self, request: &ImageRequest) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        for (key, value) in &self.extra {
            body.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        body.insert("prompt".into(), request.prompt.clone().into());
        body.insert(
            "model".into(),
            self.model
                .clone()
                .unwrap_or_else(|| request.model_id.clone())
                .into(),
        );
        body.insert("aspect_ratio".into(), request.aspect_ratio.as_str().into());
        if let Some(negative) = &request.negative_prompt {
            body.insert("negative_prompt".into(), negative.clone().into());
        }
        serde_json::Value::Object(body)
    }

    /// Find the image URL in a response body
    fn extract_url(&self, body: &str) -> Result<String, LlmError> {
        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|e| LlmError::Malformed(e.to_string()))?;

        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(LlmError::Rejected(message));
        }

        let field = value.get(&self.url_field).ok_or_else(|| {
            LlmError::Malformed(format!("response has no '{}' field", self.url_field))
        })?;
        let url = match field {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => items.iter().find_map(|v| v.as_str()).map(str::to_string),
            _ => None,
        };
        url.filter(|u| !u.is_empty()).ok_or_else(|| {
            LlmError::Malformed(format!("'{}' does not hold an image URL", self.url_field))
        })
    }
}

#[async_trait]
impl Provider for ImageJsonProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResult, LlmError> {
        let mut http = self.client.post(&self.url).json(&self.build_body(request));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = send_with_retry(http, self.max_retries).await?;
        let text = response
            .text()
            .await
            .map_err(LlmError::from_network_error)?;
        let url = self.extract_url(&text)?;
        tracing::debug!("{} produced {}", self.name, url);
        Ok(ImageResult::Url(url))
    }
}

/// Adapter for endpoints that answer with raw image bytes
pub struct ImageBinaryProvider {
    name: String,
    client: reqwest::Client,
    url: String,
    form: BTreeMap<String, String>,
    max_retries: u32,
}

impl ImageBinaryProvider {
    pub fn from_config(name: &str, config: &ImageBinaryBackend) -> Result<Self> {
        url::Url::parse(&config.url)
            .with_context(|| format!("Invalid url for backend '{}'", name))?;

        Ok(Self {
            name: name.to_string(),
            client: build_client(&config.http)?,
            url: config.url.clone(),
            form: config.form.clone(),
            max_retries: config.http.max_retries,
        })
    }

    fn build_form(&self, request: &ImageRequest) -> BTreeMap<String, String> {
        let mut form = self.form.clone();
        form.insert("prompt".to_string(), request.prompt.clone());
        form.insert(
            "aspect_ratio".to_string(),
            request.aspect_ratio.as_str().to_string(),
        );
        if let Some(negative) = &request.negative_prompt {
            form.insert("negative_prompt".to_string(), negative.clone());
        }
        form
    }
}

/// Decide what the returned bytes are; anything not declared as an image is a bad answer
fn classify_binary(content_type: Option<&str>, data: Vec<u8>) -> Result<ImageResult, LlmError> {
    let content_type = content_type
        .map(|c| c.split(';').next().unwrap_or(c).trim().to_string())
        .unwrap_or_else(|| "image/png".to_string());

    if !content_type.starts_with("image/") {
        let preview = String::from_utf8_lossy(&data[..data.len().min(200)]).to_string();
        return Err(LlmError::Malformed(format!(
            "expected image bytes, got {}: {}",
            content_type, preview
        )));
    }
    if data.is_empty() {
        return Err(LlmError::Malformed("empty image body".to_string()));
    }
    Ok(ImageResult::Inline { data, content_type })
}

#[async_trait]
impl Provider for ImageBinaryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResult, LlmError> {
        let http = self.client.post(&self.url).form(&self.build_form(request));
        let response = send_with_retry(http, self.max_retries).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response
            .bytes()
            .await
            .map_err(LlmError::from_network_error)?;

        classify_binary(content_type.as_deref(), data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use crate::llm::AspectRatio;

    fn json_provider(url_field: &str) -> ImageJsonProvider {
        ImageJsonProvider::from_config(
            "pixel",
            &ImageJsonBackend {
                url: "https://images.example.com/api/predictions".to_string(),
                model: None,
                api_key_env: None,
                url_field: url_field.to_string(),
                extra: BTreeMap::from([("style".to_string(), "none".to_string())]),
                http: HttpSettings::default(),
            },
        )
        .unwrap()
    }

    fn request() -> ImageRequest {
        ImageRequest {
            model_id: "flux-schnell".to_string(),
            prompt: "a cat".to_string(),
            negative_prompt: Some("dogs".to_string()),
            aspect_ratio: AspectRatio::Landscape,
        }
    }

    #[test]
    fn test_json_body() {
        let body = json_provider("output").build_body(&request());
        assert_eq!(body["prompt"], "a cat");
        assert_eq!(body["model"], "flux-schnell");
        assert_eq!(body["aspect_ratio"], "16:9");
        assert_eq!(body["negative_prompt"], "dogs");
        assert_eq!(body["style"], "none");
    }

    #[test]
    fn test_extract_url_shapes() {
        let p = json_provider("output");
        assert_eq!(
            p.extract_url(r#"{"output":"http://x/y.png"}"#).unwrap(),
            "http://x/y.png"
        );
        assert_eq!(
            p.extract_url(r#"{"output":["http://x/1.png","http://x/2.png"]}"#)
                .unwrap(),
            "http://x/1.png"
        );
        assert!(matches!(
            p.extract_url(r#"{"status":"queued"}"#),
            Err(LlmError::Malformed(_))
        ));
        assert!(matches!(
            p.extract_url(r#"{"error":"prompt rejected"}"#),
            Err(LlmError::Rejected(m)) if m == "prompt rejected"
        ));
        assert!(matches!(p.extract_url("not json"), Err(LlmError::Malformed(_))));
    }

    #[test]
    fn test_classify_binary() {
        let png = classify_binary(Some("image/png; charset=binary"), vec![1, 2, 3]).unwrap();
        assert_eq!(
            png,
            ImageResult::Inline {
                data: vec![1, 2, 3],
                content_type: "image/png".to_string()
            }
        );

        let html = classify_binary(Some("text/html"), b"<html>busy</html>".to_vec());
        assert!(matches!(html, Err(LlmError::Malformed(_))));
        assert!(classify_binary(Some("image/jpeg"), Vec::new()).is_err());
    }

    #[test]
    fn test_binary_form_fields() {
        let p = ImageBinaryProvider::from_config(
            "magic",
            &ImageBinaryBackend {
                url: "https://magic.example.com/api/ai-art-generator".to_string(),
                form: BTreeMap::from([("output_format".to_string(), "bytes".to_string())]),
                http: HttpSettings::default(),
            },
        )
        .unwrap();
        let form = p.build_form(&request());
        assert_eq!(form["output_format"], "bytes");
        assert_eq!(form["prompt"], "a cat");
        assert_eq!(form["negative_prompt"], "dogs");
    }
}
