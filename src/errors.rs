// src/errors.rs
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StudioError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already processing: {0}")]
    AlreadyProcessing(String),

    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Language used for messages shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ja,
    En,
}

impl Locale {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ja" => Some(Locale::Ja),
            "en" => Some(Locale::En),
            _ => None,
        }
    }
}

impl StudioError {
    /// Short message for the presentation layer. Raw collaborator details stay in the logs.
    pub fn user_message(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (StudioError::Upload(_), Locale::Ja) => "画像のアップロードに失敗しました",
            (StudioError::Upload(_), Locale::En) => "Failed to upload the image",
            (StudioError::Analysis(_), Locale::Ja) => "画像の分析に失敗しました",
            (StudioError::Analysis(_), Locale::En) => "Failed to analyze the images",
            (StudioError::Merge(_), Locale::Ja) => "マージに失敗しました",
            (StudioError::Merge(_), Locale::En) => "Failed to merge the analysis results",
            (StudioError::Generation(_), Locale::Ja) => "デザインの生成に失敗しました",
            (StudioError::Generation(_), Locale::En) => "Failed to generate the design",
            (StudioError::Persistence(_), Locale::Ja) => "デザインの保存に失敗しました",
            (StudioError::Persistence(_), Locale::En) => "Failed to save the design",
            (StudioError::ImageProcessing(_), Locale::Ja) => "画像を読み込めませんでした",
            (StudioError::ImageProcessing(_), Locale::En) => "The image could not be read",
            (StudioError::Validation(_), Locale::Ja) => "入力内容を確認してください",
            (StudioError::Validation(_), Locale::En) => "Please check your input",
            (StudioError::Forbidden(_), Locale::Ja) => "この操作を行う権限がありません",
            (StudioError::Forbidden(_), Locale::En) => "You do not have permission to do this",
            (StudioError::NotFound(_), Locale::Ja) => "見つかりませんでした",
            (StudioError::NotFound(_), Locale::En) => "Not found",
            (StudioError::AuthRequired, Locale::Ja) => "ログインしてください",
            (StudioError::AuthRequired, Locale::En) => "Please sign in",
            (StudioError::AlreadyProcessing(_), Locale::Ja) => "処理中です",
            (StudioError::AlreadyProcessing(_), Locale::En) => "Already in progress",
            (_, Locale::Ja) => "不明なエラーが発生しました",
            (_, Locale::En) => "An unknown error occurred",
        }
    }
}

impl From<reqwest::Error> for StudioError {
    fn from(e: reqwest::Error) -> Self {
        StudioError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for StudioError {
    fn from(e: serde_json::Error) -> Self {
        StudioError::Serialization(e.to_string())
    }
}

impl ResponseError for StudioError {
    fn error_response(&self) -> HttpResponse {
        let locale = Locale::default();
        match self {
            StudioError::AuthRequired => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Authentication required",
                "action": "sign_in",
                "message": self.user_message(locale)
            })),
            StudioError::AlreadyProcessing(_) => {
                HttpResponse::Conflict().json(serde_json::json!({
                    "error": "Already processing",
                    "message": self.to_string()
                }))
            }
            StudioError::InvalidStage(_) => HttpResponse::Conflict().json(serde_json::json!({
                "error": "Invalid stage",
                "message": self.to_string()
            })),
            StudioError::Forbidden(_) => HttpResponse::Forbidden().json(serde_json::json!({
                "error": "Forbidden",
                "message": self.user_message(locale)
            })),
            StudioError::NotFound(_) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "Not found",
                "message": self.to_string()
            })),
            StudioError::Validation(_) | StudioError::ImageProcessing(_) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "Invalid request",
                    "message": self.user_message(locale),
                    "detail": self.to_string()
                }))
            }
            StudioError::Upload(_)
            | StudioError::Analysis(_)
            | StudioError::Merge(_)
            | StudioError::Generation(_)
            | StudioError::Persistence(_)
            | StudioError::Http(_) => HttpResponse::BadGateway().json(serde_json::json!({
                "error": "Remote service error",
                "message": self.user_message(locale),
                "detail": self.to_string()
            })),
            StudioError::Serialization(_) | StudioError::Config(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Internal error",
                    "message": self.to_string()
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn auth_required_asks_for_sign_in() {
        let resp = StudioError::AuthRequired.error_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn remote_failures_map_to_bad_gateway() {
        let resp = StudioError::Generation("boom".into()).error_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let resp = StudioError::AlreadyProcessing("42".into()).error_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = StudioError::Forbidden("item 7".into()).error_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn user_messages_are_localized() {
        let err = StudioError::Upload("presign 500".into());
        assert_eq!(err.user_message(Locale::Ja), "画像のアップロードに失敗しました");
        assert_eq!(err.user_message(Locale::En), "Failed to upload the image");
        assert!(!err.user_message(Locale::En).contains("presign"));
    }

    #[test]
    fn locale_parsing() {
        assert_eq!(Locale::parse("EN"), Some(Locale::En));
        assert_eq!(Locale::parse(" ja "), Some(Locale::Ja));
        assert_eq!(Locale::parse("fr"), None);
    }
}
