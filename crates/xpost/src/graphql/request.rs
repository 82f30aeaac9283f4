use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{AssemblerConfig, CookieQuoting, FingerprintConfig, SiteConfig};
use crate::error::{Result, XpostError};
use crate::fingerprint::FingerprintCipher;
use crate::utils::{capture_group_1, utf16_len};

/// Longest accepted post, in UTF-16 code units.
pub const MAX_CONTENT_LEN: usize = 280;

pub static STATUS_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/status(?:es)?/(\d+)(?:[/?#]|$)").unwrap());

/// Numeric post id from a permalink such as `https://x.com/user/status/123`.
pub fn extract_status_id(url: &str) -> Result<String> {
    capture_group_1(&STATUS_ID_REGEX, url)
        .map(ToOwned::to_owned)
        .ok_or_else(|| XpostError::invalid_input(format!("no status id in {url:?}")))
}

pub fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(XpostError::invalid_input("content is empty"));
    }
    let len = utf16_len(content);
    if len > MAX_CONTENT_LEN {
        return Err(XpostError::invalid_input(format!(
            "content is {len} characters, limit is {MAX_CONTENT_LEN}"
        )));
    }
    Ok(())
}

/// Credentials that go into one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestCredentials<'a> {
    pub session_token: &'a str,
    pub csrf_token: &'a str,
    pub bearer_token: &'a str,
    pub session_identifier: &'a str,
}

/// A fully built call, headers in emission order.
#[derive(Debug, Clone)]
pub struct AssembledRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl AssembledRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn into_request(self, client: &Client) -> RequestBuilder {
        let mut builder = client.request(self.method, &self.url);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(self.body)
    }
}

#[derive(Serialize)]
struct CreateTweetBody<'a> {
    variables: CreateTweetVariables<'a>,
    features: &'a BTreeMap<String, bool>,
    #[serde(rename = "queryId")]
    query_id: &'a str,
}

#[derive(Serialize)]
struct CreateTweetVariables<'a> {
    tweet_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ReplyTarget<'a>>,
    dark_request: bool,
    media: Media,
    semantic_annotation_ids: &'static [String],
    disallowed_reply_options: Option<Value>,
}

#[derive(Serialize)]
struct ReplyTarget<'a> {
    in_reply_to_tweet_id: &'a str,
    exclude_reply_user_ids: &'static [String],
}

#[derive(Serialize)]
struct Media {
    media_entities: &'static [Value],
    possibly_sensitive: bool,
}

/// Builds `CreateTweet` calls that look like they came from the web client.
#[derive(Debug, Clone)]
pub struct RequestAssembler {
    site: SiteConfig,
    config: AssemblerConfig,
    cipher: FingerprintCipher,
    fingerprint_user_agent: String,
}

impl RequestAssembler {
    pub fn new(site: SiteConfig, config: AssemblerConfig, fingerprint: &FingerprintConfig) -> Self {
        Self {
            site,
            config,
            cipher: FingerprintCipher::new(fingerprint.shared_secret.clone()),
            fingerprint_user_agent: fingerprint.user_agent.clone(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/i/api/graphql/{}/CreateTweet",
            self.site.base_url.trim_end_matches('/'),
            self.config.query_id
        )
    }

    pub fn build_create_post(&self, content: &str, creds: RequestCredentials<'_>) -> Result<AssembledRequest> {
        validate_content(content)?;
        let referer = format!("{}/home", self.site.base_url.trim_end_matches('/'));
        self.assemble(content, None, &referer, creds)
    }

    /// `target_url` must be a permalink; the assembler refuses to build without a status id.
    pub fn build_create_reply(
        &self,
        content: &str,
        target_url: &str,
        creds: RequestCredentials<'_>,
    ) -> Result<AssembledRequest> {
        validate_content(content)?;
        let target_id = extract_status_id(target_url)?;
        self.assemble(content, Some(&target_id), target_url, creds)
    }

    fn body(&self, content: &str, reply_to: Option<&str>) -> Result<String> {
        let body = CreateTweetBody {
            variables: CreateTweetVariables {
                tweet_text: format!("{content}\n"),
                reply: reply_to.map(|id| ReplyTarget {
                    in_reply_to_tweet_id: id,
                    exclude_reply_user_ids: &[],
                }),
                dark_request: false,
                media: Media {
                    media_entities: &[],
                    possibly_sensitive: false,
                },
                semantic_annotation_ids: &[],
                disallowed_reply_options: None,
            },
            features: &self.config.features,
            query_id: &self.config.query_id,
        };
        Ok(serde_json::to_string(&body)?)
    }

    fn cookie_header(&self, creds: &RequestCredentials<'_>) -> String {
        match self.config.cookie_quoting {
            CookieQuoting::Unquoted => format!(
                "auth_token={}; ct0={}",
                creds.session_token, creds.csrf_token
            ),
            CookieQuoting::Quoted => format!(
                "auth_token=\"{}\"; ct0=\"{}\"",
                creds.session_token, creds.csrf_token
            ),
        }
    }

    fn assemble(
        &self,
        content: &str,
        reply_to: Option<&str>,
        referer: &str,
        creds: RequestCredentials<'_>,
    ) -> Result<AssembledRequest> {
        let body = self.body(content, reply_to)?;
        let xpff = self
            .cipher
            .header_value(&self.fingerprint_user_agent, creds.session_identifier)?;
        let site = &self.site;

        let mut headers: Vec<(&str, String)> = vec![
            ("Host", site.api_host.clone()),
            ("Cookie", self.cookie_header(&creds)),
            ("Content-Length", body.len().to_string()),
            ("Sec-Ch-Ua-Platform", site.sec_ch_ua_platform.clone()),
            ("Authorization", format!("Bearer {}", creds.bearer_token)),
            ("X-Csrf-Token", creds.csrf_token.to_string()),
            ("Accept-Language", site.accept_language.clone()),
            ("Sec-Ch-Ua", site.sec_ch_ua.clone()),
            ("X-Twitter-Client-Language", site.client_language.clone()),
            ("Sec-Ch-Ua-Mobile", "?0".to_string()),
            ("X-Twitter-Active-User", "yes".to_string()),
            ("X-Twitter-Auth-Type", "OAuth2Session".to_string()),
            ("User-Agent", site.user_agent.clone()),
            ("Content-Type", "application/json".to_string()),
            ("X-Xp-Forwarded-For", xpff),
            ("Accept", "*/*".to_string()),
            ("Origin", site.base_url.trim_end_matches('/').to_string()),
            ("Sec-Fetch-Site", "same-origin".to_string()),
            ("Sec-Fetch-Mode", "cors".to_string()),
            ("Sec-Fetch-Dest", "empty".to_string()),
            ("Referer", referer.to_string()),
            ("Priority", "u=1, i".to_string()),
        ];
        if let Some(transaction_id) = &self.config.transaction_id {
            headers.push(("X-Client-Transaction-Id", transaction_id.clone()));
        }

        // Stable sort: unlisted headers keep their relative order after the listed ones.
        let order = &self.config.header_order;
        headers.sort_by_key(|(name, _)| {
            order
                .iter()
                .position(|o| o.eq_ignore_ascii_case(name))
                .unwrap_or(usize::MAX)
        });

        debug!(
            reply = reply_to.is_some(),
            body_len = body.len(),
            "Assembled CreateTweet request"
        );

        Ok(AssembledRequest {
            url: self.endpoint(),
            method: Method::POST,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::config::DEFAULT_HEADER_ORDER;

    fn creds() -> RequestCredentials<'static> {
        RequestCredentials {
            session_token: "abc",
            csrf_token: "csrf1",
            bearer_token: "BEARER",
            session_identifier: "g1",
        }
    }

    fn assembler(config: AssemblerConfig) -> RequestAssembler {
        RequestAssembler::new(SiteConfig::default(), config, &FingerprintConfig::default())
    }

    #[rstest]
    #[case("https://x.com/someone/status/1234567890", Some("1234567890"))]
    #[case("https://twitter.com/a/status/42?s=20", Some("42"))]
    #[case("https://x.com/a/status/99/photo/1", Some("99"))]
    #[case("https://x.com/someone", None)]
    #[case("https://x.com/a/status/abc", None)]
    #[case("https://x.com/a/status/12abc", None)]
    #[case("https://x.com/a/statuses/77#top", Some("77"))]
    #[case("https://site/user/status/", None)]
    #[case("not a url", None)]
    fn test_extract_status_id(#[case] url: &str, #[case] expected: Option<&str>) {
        match expected {
            Some(id) => assert_eq!(extract_status_id(url).unwrap(), id),
            None => assert!(matches!(
                extract_status_id(url),
                Err(XpostError::InvalidInput(_))
            )),
        }
    }

    #[test]
    fn test_post_body_and_headers() {
        let request = assembler(AssemblerConfig::default())
            .build_create_post("hello", creds())
            .unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.url,
            "https://x.com/i/api/graphql/F7hteriqzdRzvMfXM6Ul4w/CreateTweet"
        );

        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["variables"]["tweet_text"], "hello\n");
        assert!(body["variables"].get("reply").is_none());
        assert_eq!(body["variables"]["dark_request"], false);
        assert_eq!(body["variables"]["media"]["media_entities"], serde_json::json!([]));
        assert!(body["variables"]["disallowed_reply_options"].is_null());
        assert_eq!(body["queryId"], "F7hteriqzdRzvMfXM6Ul4w");
        assert_eq!(body["features"]["responsive_web_edit_tweet_api_enabled"], true);

        assert_eq!(request.header("cookie"), Some("auth_token=abc; ct0=csrf1"));
        assert_eq!(request.header("X-Csrf-Token"), Some("csrf1"));
        assert_eq!(request.header("Authorization"), Some("Bearer BEARER"));
        assert_eq!(request.header("Referer"), Some("https://x.com/home"));
        assert!(request.header("X-Client-Transaction-Id").is_none());

        let xpff = request.header("X-Xp-Forwarded-For").unwrap();
        let payload = FingerprintCipher::new(FingerprintConfig::default().shared_secret)
            .decrypt(xpff, "g1")
            .unwrap();
        assert!(payload.navigator_properties.has_been_active);
        assert!(!payload.navigator_properties.webdriver);
    }

    #[test]
    fn test_reply_id_is_a_json_string() {
        let url = "https://x.com/someone/status/1934567890123456789";
        let request = assembler(AssemblerConfig::default())
            .build_create_reply("hi", url, creds())
            .unwrap();

        let body: Value = serde_json::from_str(&request.body).unwrap();
        let reply = &body["variables"]["reply"];
        assert_eq!(reply["in_reply_to_tweet_id"], Value::String("1934567890123456789".into()));
        assert_eq!(reply["exclude_reply_user_ids"], serde_json::json!([]));
        assert_eq!(request.header("Referer"), Some(url));
    }

    #[test]
    fn test_reply_without_status_id_is_refused() {
        let err = assembler(AssemblerConfig::default())
            .build_create_reply("hi", "https://x.com/someone", creds())
            .unwrap_err();
        assert!(matches!(err, XpostError::InvalidInput(_)));
    }

    #[test]
    fn test_content_length_counts_bytes() {
        let content = "héllo 😀 世界";
        let request = assembler(AssemblerConfig::default())
            .build_create_post(content, creds())
            .unwrap();
        assert_eq!(
            request.header("Content-Length"),
            Some(request.body.len().to_string().as_str())
        );
        assert!(request.body.len() > request.body.chars().count());
    }

    #[test]
    fn test_newline_in_content_is_escaped() {
        let request = assembler(AssemblerConfig::default())
            .build_create_post("line one\nline \"two\"", creds())
            .unwrap();
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["variables"]["tweet_text"], "line one\nline \"two\"\n");
    }

    #[test]
    fn test_quoted_cookie_variant() {
        let config = AssemblerConfig {
            cookie_quoting: CookieQuoting::Quoted,
            ..Default::default()
        };
        let request = assembler(config).build_create_post("x", creds()).unwrap();
        assert_eq!(request.header("Cookie"), Some(r#"auth_token="abc"; ct0="csrf1""#));
    }

    #[test]
    fn test_header_order_follows_config() {
        let config = AssemblerConfig {
            transaction_id: Some("txid".to_string()),
            ..Default::default()
        };
        let request = assembler(config).build_create_post("x", creds()).unwrap();
        assert_eq!(request.header_names(), DEFAULT_HEADER_ORDER.to_vec());

        let reversed = AssemblerConfig {
            header_order: vec!["Priority".to_string(), "Host".to_string()],
            ..Default::default()
        };
        let request = assembler(reversed).build_create_post("x", creds()).unwrap();
        assert_eq!(&request.header_names()[..3], &["Priority", "Host", "Cookie"]);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn test_empty_content_rejected(#[case] content: &str) {
        assert!(matches!(
            validate_content(content),
            Err(XpostError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_length_limit_uses_utf16_units() {
        assert!(validate_content(&"a".repeat(280)).is_ok());
        assert!(validate_content(&"a".repeat(281)).is_err());
        // 140 emoji are 280 code units
        assert!(validate_content(&"😀".repeat(140)).is_ok());
        assert!(validate_content(&"😀".repeat(141)).is_err());
    }
}
