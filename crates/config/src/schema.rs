//! Config schema types (gateway, provider, phone plans, sessions, auto-reply).

use std::time::Duration;

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize, Serializer},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZapgateConfig {
    pub gateway: GatewayConfig,
    pub provider: ProviderConfig,
    pub phone: PhoneConfig,
    pub sessions: SessionsConfig,
    pub auto_reply: AutoReplyConfig,
}

impl ZapgateConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.phone.validate()?;
        self.sessions.validate()?;
        if self.provider.kind == ProviderKind::Bridge && self.provider.base_url.trim().is_empty() {
            anyhow::bail!("provider.base_url is required for the bridge provider");
        }
        Ok(())
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 4444,
        }
    }
}

// ── Provider ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// HTTP bridge sidecar speaking the chat network protocol.
    #[default]
    Bridge,
    /// In-process directory, for local development.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    /// Bearer token sent to the bridge. Prefer `${ENV_VAR}` substitution.
    /// Never written back out: serializing yields a redacted placeholder.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_redacted"
    )]
    pub api_token: Option<Secret<String>>,
    pub request_timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Bridge,
            base_url: "http://localhost:5555".into(),
            api_token: None,
            request_timeout_ms: 15_000,
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

pub const REDACTED: &str = "[REDACTED]";

fn serialize_redacted<S: Serializer>(
    _secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(REDACTED)
}

// ── Phone resolution ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneConfig {
    /// Routing suffixes stripped from raw input before normalization.
    pub routing_suffixes: Vec<String>,
    /// Timeout for a single existence probe.
    pub probe_timeout_ms: u64,
    /// Cache successful resolutions per connected session.
    pub cache: bool,
    pub domestic: DomesticPlanConfig,
    pub foreign: Vec<ForeignPlanConfig>,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            routing_suffixes: vec!["@s.whatsapp.net".into(), "@c.us".into()],
            probe_timeout_ms: 5_000,
            cache: true,
            domestic: DomesticPlanConfig::default(),
            foreign: default_foreign_plans(),
        }
    }
}

impl PhoneConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.probe_timeout_ms == 0 {
            anyhow::bail!("phone.probe_timeout_ms must be greater than zero");
        }
        self.domestic.validate()?;
        for plan in &self.foreign {
            ensure_country_code(&plan.country_code)?;
            if plan.national_lengths.is_empty() {
                anyhow::bail!(
                    "phone.foreign[{}]: national_lengths must not be empty",
                    plan.country_code
                );
            }
            if plan.country_code == self.domestic.country_code {
                anyhow::bail!(
                    "phone.foreign[{}] duplicates the domestic country code",
                    plan.country_code
                );
            }
        }
        Ok(())
    }
}

/// The numbering plan that gets mobile-marker correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomesticPlanConfig {
    pub country_code: String,
    /// Recognized area codes. All entries must share one length.
    pub area_codes: Vec<String>,
    /// Subscriber length of a landline number; mobiles carry one extra digit.
    pub subscriber_digits: usize,
    /// The leading digit that marks the mobile-length form.
    pub mobile_marker: String,
    /// First digits of a landline-length number that may be a mobile.
    pub mobile_leading_digits: String,
}

impl Default for DomesticPlanConfig {
    fn default() -> Self {
        Self {
            country_code: "55".into(),
            area_codes: BRAZIL_AREA_CODES.iter().map(|c| c.to_string()).collect(),
            subscriber_digits: 8,
            mobile_marker: "9".into(),
            mobile_leading_digits: "6789".into(),
        }
    }
}

impl DomesticPlanConfig {
    fn validate(&self) -> anyhow::Result<()> {
        ensure_country_code(&self.country_code)?;
        let Some(first) = self.area_codes.first() else {
            anyhow::bail!("phone.domestic.area_codes must not be empty");
        };
        let len = first.len();
        if self
            .area_codes
            .iter()
            .any(|c| c.len() != len || !c.bytes().all(|b| b.is_ascii_digit()))
        {
            anyhow::bail!("phone.domestic.area_codes must be digit strings of equal length");
        }
        if self.subscriber_digits == 0 {
            anyhow::bail!("phone.domestic.subscriber_digits must be greater than zero");
        }
        if self.mobile_marker.len() != 1 || !self.mobile_marker.bytes().all(|b| b.is_ascii_digit())
        {
            anyhow::bail!("phone.domestic.mobile_marker must be a single digit");
        }
        if !self.mobile_leading_digits.bytes().all(|b| b.is_ascii_digit()) {
            anyhow::bail!("phone.domestic.mobile_leading_digits must contain only digits");
        }
        Ok(())
    }
}

/// A foreign plan: numbers are resolved verbatim, never corrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignPlanConfig {
    pub country_code: String,
    /// Accepted lengths of the number after the country code.
    pub national_lengths: Vec<usize>,
}

fn ensure_country_code(code: &str) -> anyhow::Result<()> {
    if code.is_empty() || code.len() > 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        anyhow::bail!("invalid country code '{code}': expected 1-3 digits");
    }
    Ok(())
}

fn default_foreign_plans() -> Vec<ForeignPlanConfig> {
    let plan = |cc: &str, lens: &[usize]| ForeignPlanConfig {
        country_code: cc.into(),
        national_lengths: lens.to_vec(),
    };
    vec![
        plan("1", &[10]),
        plan("34", &[9]),
        plan("44", &[10]),
        plan("49", &[10, 11]),
        plan("54", &[10, 11]),
        plan("351", &[9]),
    ]
}

/// Brazilian DDD area codes.
const BRAZIL_AREA_CODES: &[&str] = &[
    "11", "12", "13", "14", "15", "16", "17", "18", "19", //
    "21", "22", "24", "27", "28", //
    "31", "32", "33", "34", "35", "37", "38", //
    "41", "42", "43", "44", "45", "46", "47", "48", "49", //
    "51", "53", "54", "55", //
    "61", "62", "63", "64", "65", "66", "67", "68", "69", //
    "71", "73", "74", "75", "77", "79", //
    "81", "82", "83", "84", "85", "86", "87", "88", "89", //
    "91", "92", "93", "94", "95", "96", "97", "98", "99",
];

// ── Sessions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Upper bound for the provider to hand out a pairing artifact.
    pub pairing_timeout_ms: u64,
    /// How long a QR request waits for the first artifact while connecting.
    pub qr_wait_ms: u64,
    /// Timeout for a single provider send call.
    pub send_timeout_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            pairing_timeout_ms: 30_000,
            qr_wait_ms: 30_000,
            send_timeout_ms: 30_000,
        }
    }
}

impl SessionsConfig {
    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }

    pub fn qr_wait(&self) -> Duration {
        Duration::from_millis(self.qr_wait_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.pairing_timeout_ms == 0 || self.qr_wait_ms == 0 || self.send_timeout_ms == 0 {
            anyhow::bail!("sessions timeouts must be greater than zero");
        }
        Ok(())
    }
}

// ── Auto-reply ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoReplyConfig {
    pub enabled: bool,
    /// Matched case-insensitively against whole words of the message text.
    pub keywords: Vec<String>,
    pub reply_text: String,
}

impl Default for AutoReplyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: vec!["hello".into(), "oi".into(), "olá".into()],
            reply_text: "Hello! This is an auto-reply from the WhatsApp bridge.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn bridge_token_stays_out_of_debug_and_toml() {
        let cfg: ZapgateConfig =
            toml::from_str("[provider]\napi_token = \"s3cr3t-bridge-token\"\n").unwrap();
        let token = cfg.provider.api_token.as_ref().unwrap();
        assert_eq!(token.expose_secret(), "s3cr3t-bridge-token");

        assert!(!format!("{cfg:?}").contains("s3cr3t"));
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(!text.contains("s3cr3t"));
        assert!(text.contains(REDACTED));

        let text = toml::to_string_pretty(&ZapgateConfig::default()).unwrap();
        assert!(!text.contains("api_token"));
    }

    #[test]
    fn defaults_validate() {
        ZapgateConfig::default().validate().unwrap();
    }

    #[test]
    fn default_domestic_plan_is_brazil() {
        let plan = DomesticPlanConfig::default();
        assert_eq!(plan.country_code, "55");
        assert!(plan.area_codes.iter().any(|c| c == "12"));
        assert!(plan.area_codes.iter().any(|c| c == "41"));
        assert!(!plan.area_codes.iter().any(|c| c == "20"));
    }

    #[test]
    fn rejects_mixed_area_code_lengths() {
        let mut cfg = ZapgateConfig::default();
        cfg.phone.domestic.area_codes.push("123".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_multi_digit_marker() {
        let mut cfg = ZapgateConfig::default();
        cfg.phone.domestic.mobile_marker = "99".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_foreign_plan_shadowing_domestic() {
        let mut cfg = ZapgateConfig::default();
        cfg.phone.foreign.push(ForeignPlanConfig {
            country_code: "55".into(),
            national_lengths: vec![10],
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn memory_provider_needs_no_url() {
        let mut cfg = ZapgateConfig::default();
        cfg.provider.kind = ProviderKind::Memory;
        cfg.provider.base_url.clear();
        cfg.validate().unwrap();
    }
}
