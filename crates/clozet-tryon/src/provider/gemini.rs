//! Gemini `generateContent` wire types and response classification.

use serde::{Deserialize, Serialize};

use super::error::ProviderError;

pub const TRYON_INSTRUCTION: &str = "Generate a photo of the person from the first image wearing the outfit from the second image. Fit the outfit naturally. Keep the face, body, and background from the first image unchanged.";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Phrases in a text-only reply that mean the model cannot draw.
const UNSUPPORTED_HINTS: [&str; 6] = [
    "cannot",
    "can't",
    "unable",
    "not able",
    "text-only",
    "language model",
];

/// Gemini API request.
#[derive(Debug, Serialize)]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Image { inline_data: InlineData },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

/// A downloaded source image, base64-encoded.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: String,
}

impl GenerateContentRequest {
    /// Person first, garment second, then the instruction.
    pub fn tryon(avatar: EncodedImage, fit: EncodedImage) -> Self {
        let image = |img: EncodedImage| RequestPart::Image {
            inline_data: InlineData {
                mime_type: img.mime_type,
                data: img.data,
            },
        };

        Self {
            contents: vec![Content {
                parts: vec![
                    image(avatar),
                    image(fit),
                    RequestPart::Text {
                        text: TRYON_INSTRUCTION.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                max_output_tokens: 8192,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        }
    }
}

/// Gemini API response.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<SnakeInlineData>,
    #[serde(rename = "inlineData")]
    inline_data_camel: Option<CamelInlineData>,
}

#[derive(Debug, Deserialize)]
struct SnakeInlineData {
    mime_type: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CamelInlineData {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    data: Option<String>,
}

impl ResponsePart {
    /// `(mime_type, base64)` from either casing of the inline data field.
    fn image(&self) -> Option<(String, &str)> {
        let (mime, data) = match (&self.inline_data, &self.inline_data_camel) {
            (Some(d), _) if d.data.is_some() => (d.mime_type.as_deref(), d.data.as_deref()),
            (_, Some(d)) if d.data.is_some() => (d.mime_type.as_deref(), d.data.as_deref()),
            _ => return None,
        };
        let data = data.filter(|d| !d.is_empty())?;
        Some((mime.unwrap_or("image/jpeg").to_string(), data))
    }
}

fn is_supported_image(mime_type: &str) -> bool {
    mime_type.contains("png") || mime_type.contains("jpeg") || mime_type.contains("jpg")
}

/// Pull the generated image out of a response, or explain why there is none.
pub fn extract_image(response: &GenerateContentResponse) -> Result<EncodedImage, ProviderError> {
    if let Some(error) = &response.error {
        return Err(ProviderError::ApiMessage(error.message.clone()));
    }

    let candidate = response
        .candidates
        .first()
        .ok_or(ProviderError::NoCandidates)?;
    let finish_reason = candidate.finish_reason.as_deref().unwrap_or("unknown");

    match finish_reason {
        "SAFETY" => return Err(ProviderError::SafetyBlocked),
        "RECITATION" => return Err(ProviderError::RecitationBlocked),
        _ => {}
    }

    let parts = candidate
        .content
        .as_ref()
        .map(|c| c.parts.as_slice())
        .unwrap_or_default();
    if parts.is_empty() {
        return Err(ProviderError::NoContentParts(finish_reason.to_string()));
    }

    if let Some((mime_type, data)) = parts.iter().find_map(|p| p.image()) {
        if is_supported_image(&mime_type) {
            return Ok(EncodedImage {
                mime_type,
                data: data.to_string(),
            });
        }
    }

    let text = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if UNSUPPORTED_HINTS.iter().any(|hint| text.contains(hint)) {
        return Err(ProviderError::Unsupported);
    }

    Err(ProviderError::NoImage)
}

/// Mime type to send for a downloaded image.
///
/// WebP is relabelled as JPEG, and anything that does not claim to be an
/// image falls back to JPEG.
pub fn detect_mime_type(content_type: Option<&str>, bytes: &[u8]) -> String {
    let content_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_lowercase())
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| "image/jpeg".to_string());

    let webp_magic = bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP";
    if content_type == "image/webp" || webp_magic || !content_type.starts_with("image/") {
        return "image/jpeg".to_string();
    }
    content_type
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let img = |m: &str| EncodedImage {
            mime_type: m.to_string(),
            data: "AAAA".to_string(),
        };
        let request = GenerateContentRequest::tryon(img("image/png"), img("image/jpeg"));
        let json = serde_json::to_value(&request).unwrap();

        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(parts[2]["text"], TRYON_INSTRUCTION);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(json["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(json["safetySettings"][0]["threshold"], "BLOCK_MEDIUM_AND_ABOVE");
    }

    #[test]
    fn test_extracts_either_casing() {
        let snake = parse(json!({"candidates": [{"content": {"parts": [
            {"text": "here you go"},
            {"inline_data": {"mime_type": "image/png", "data": "iVBO"}}
        ]}, "finishReason": "STOP"}]}));
        assert_eq!(extract_image(&snake).unwrap().mime_type, "image/png");

        let camel = parse(json!({"candidates": [{"content": {"parts": [
            {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/"}}
        ]}}]}));
        let image = extract_image(&camel).unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.data, "/9j/");
    }

    #[test]
    fn test_blocked_and_empty_responses() {
        let err = extract_image(&parse(json!({"candidates": []}))).unwrap_err();
        assert!(matches!(err, ProviderError::NoCandidates));

        let err = extract_image(&parse(json!({"candidates": [{"finishReason": "SAFETY"}]}))).unwrap_err();
        assert!(matches!(err, ProviderError::SafetyBlocked));

        let err = extract_image(&parse(json!({"candidates": [{"finishReason": "RECITATION"}]})))
            .unwrap_err();
        assert!(matches!(err, ProviderError::RecitationBlocked));

        let err = extract_image(&parse(json!({"candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]})))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Gemini API returned no content parts (finish reason: MAX_TOKENS)"
        );

        let err = extract_image(&parse(json!({"error": {"code": 400, "message": "API key not valid"}})))
            .unwrap_err();
        assert_eq!(err.to_string(), "Gemini API error: API key not valid");
    }

    #[test]
    fn test_text_only_replies() {
        let refusal = parse(json!({"candidates": [{"content": {"parts": [
            {"text": "As a language model I can't create images."}
        ]}}]}));
        assert!(matches!(extract_image(&refusal).unwrap_err(), ProviderError::Unsupported));

        let chatter = parse(json!({"candidates": [{"content": {"parts": [
            {"text": "Here is a description of the outfit."}
        ]}}]}));
        assert!(matches!(extract_image(&chatter).unwrap_err(), ProviderError::NoImage));

        let gif = parse(json!({"candidates": [{"content": {"parts": [
            {"inline_data": {"mime_type": "image/gif", "data": "R0lG"}}
        ]}}]}));
        assert!(matches!(extract_image(&gif).unwrap_err(), ProviderError::NoImage));
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(detect_mime_type(None, b"\xff\xd8"), "image/jpeg");
        assert_eq!(detect_mime_type(Some("image/png"), b"\x89PNG"), "image/png");
        assert_eq!(detect_mime_type(Some("image/webp"), b""), "image/jpeg");
        assert_eq!(detect_mime_type(Some("application/octet-stream"), b""), "image/jpeg");
        assert_eq!(
            detect_mime_type(Some("image/png"), b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            "image/jpeg"
        );
        assert_eq!(detect_mime_type(Some("image/png; charset=binary"), b""), "image/png");
    }
}
