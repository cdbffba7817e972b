//! Image handling for multimodal requests.
//!
//! Remote image references are resolved once per request by an [`ImageFetcher`]
//! before conversion starts. Inline images are then brought within the
//! backend's pixel cap by [`ImageComplianceProcessor`] and within its upload
//! size cap by an [`ImageCompressor`].

pub mod compliance;
pub mod compress;
pub mod fetch;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use std::collections::HashMap;

use crate::translate::canonical_types::{ChatCompletionRequest, ChatContent, ContentPart};

pub use compliance::ImageComplianceProcessor;
pub use compress::{ImageCompressor, JpegBudgetCompressor};
pub use fetch::{HttpImageFetcher, ImageFetcher, PrefetchedImages};

/// URL → inline payload lookup table produced by an [`ImageFetcher`].
pub type ResolvedImages = HashMap<String, InlineImage>;

/// A base64-encoded image with its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub media_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn new(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(media_type, BASE64_STANDARD.encode(bytes))
    }

    /// Parse a `data:<media>;base64,<payload>` envelope.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (metadata, data) = rest.split_once(',')?;
        let media_type = metadata.strip_suffix(";base64")?;
        if media_type.is_empty() {
            return None;
        }
        Some(Self::new(media_type, data.trim()))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(self.data.as_bytes())
    }

    /// Size of the decoded payload, computed without decoding.
    pub fn decoded_len(&self) -> usize {
        let len = self.data.len();
        let padding = self.data.bytes().rev().take_while(|b| *b == b'=').count();
        (len * 3 / 4).saturating_sub(padding.min(2))
    }
}

pub fn is_remote_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Distinct remote image URLs referenced anywhere in the request, in order of
/// first appearance.
pub fn collect_remote_urls(req: &ChatCompletionRequest) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for msg in &req.messages {
        let Some(ChatContent::Parts(parts)) = &msg.content else {
            continue;
        };
        for part in parts {
            if let ContentPart::ImageUrl { image_url, .. } = part {
                if is_remote_url(&image_url.url) && !urls.contains(&image_url.url) {
                    urls.push(image_url.url.clone());
                }
            }
        }
    }
    urls
}

/// Guess a media type from the leading bytes of an image.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    let media = match format {
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::Jpeg => "image/jpeg",
        image::ImageFormat::Gif => "image/gif",
        image::ImageFormat::WebP => "image/webp",
        image::ImageFormat::Bmp => "image/bmp",
        _ => return None,
    };
    Some(media)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::canonical_types::{ChatMessage, ImageUrlDetail, Role};

    #[test]
    fn test_data_url_roundtrip() {
        let img = InlineImage::from_data_url("data:image/png;base64,AAAA").unwrap();
        assert_eq!(img.media_type, "image/png");
        assert_eq!(img.data, "AAAA");
        assert_eq!(img.to_data_url(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_non_base64_data_url_rejected() {
        assert!(InlineImage::from_data_url("data:image/png,raw").is_none());
        assert!(InlineImage::from_data_url("https://example.com/a.png").is_none());
    }

    #[test]
    fn test_decoded_len_matches_decode() {
        for raw in [&b"a"[..], b"ab", b"abc", b"abcd", b"abcdefghij"] {
            let img = InlineImage::from_bytes("image/png", raw);
            assert_eq!(img.decoded_len(), raw.len());
        }
    }

    #[test]
    fn test_decoded_len_of_padding_only_payload_is_zero() {
        for data in ["=", "==", "==="] {
            let img = InlineImage::from_data_url(&format!("data:image/png;base64,{data}")).unwrap();
            assert_eq!(img.decoded_len(), 0, "{data}");
        }
    }

    #[test]
    fn test_collect_remote_urls_dedupes_and_skips_inline() {
        let image = |url: &str| ContentPart::ImageUrl {
            image_url: ImageUrlDetail {
                url: url.to_string(),
                detail: None,
            },
            cache_control: None,
        };
        let req = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![
                ChatMessage {
                    role: Role::User,
                    content: Some(ChatContent::Parts(vec![
                        image("https://a/1.png"),
                        image("data:image/png;base64,AAAA"),
                        image("https://a/2.png"),
                    ])),
                    ..ChatMessage::default()
                },
                ChatMessage {
                    role: Role::User,
                    content: Some(ChatContent::Parts(vec![image("https://a/1.png")])),
                    ..ChatMessage::default()
                },
            ],
            ..ChatCompletionRequest::default()
        };

        assert_eq!(
            collect_remote_urls(&req),
            vec!["https://a/1.png".to_string(), "https://a/2.png".to_string()]
        );
    }
}
