//! Two-letter event codes written by ODK Collect into `log.txt`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event code of a log row.
///
/// The codes the analysis cares about are named; everything else the client
/// may write is kept verbatim in [`Code::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// Activity resumed (`oR`)
    #[serde(rename = "oR")]
    Resume,
    /// Activity paused (`oP`)
    #[serde(rename = "oP")]
    Pause,
    /// Enter a prompt (`EP`)
    #[serde(rename = "EP")]
    EnterPrompt,
    /// Leave a prompt (`LP`)
    #[serde(rename = "LP")]
    LeavePrompt,
    /// A constraint or required flag was contravened (`CC`)
    #[serde(rename = "CC")]
    ConstraintContravened,
    /// Save form (`SF`)
    #[serde(rename = "SF")]
    SaveForm,
    /// Form relation created (`rC`)
    #[serde(rename = "rC")]
    RelationCreate,
    /// Form relation value update (`rV`)
    #[serde(rename = "rV")]
    RelationUpdate,
    /// Related form removed itself (`rS`)
    #[serde(rename = "rS")]
    RelationSelfDestruct,
    /// Beginning of form (`BF`)
    #[serde(rename = "BF")]
    BeginForm,
    /// Finalize form (`FF`)
    #[serde(rename = "FF")]
    FinishForm,
    /// Leave form (`LF`)
    #[serde(rename = "LF")]
    LeaveForm,
    #[serde(untagged)]
    Other(String),
}

impl Code {
    pub fn as_str(&self) -> &str {
        match self {
            Code::Resume => "oR",
            Code::Pause => "oP",
            Code::EnterPrompt => "EP",
            Code::LeavePrompt => "LP",
            Code::ConstraintContravened => "CC",
            Code::SaveForm => "SF",
            Code::RelationCreate => "rC",
            Code::RelationUpdate => "rV",
            Code::RelationSelfDestruct => "rS",
            Code::BeginForm => "BF",
            Code::FinishForm => "FF",
            Code::LeaveForm => "LF",
            Code::Other(code) => code.as_str(),
        }
    }

    /// Form-relation bookkeeping codes
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            Code::RelationCreate | Code::RelationUpdate | Code::RelationSelfDestruct
        )
    }

    /// Codes marking the beginning or end of a questionnaire
    pub fn is_bookend(&self) -> bool {
        matches!(self, Code::BeginForm | Code::FinishForm)
    }

    /// Codes that may legitimately appear several times in a row.
    ///
    /// A time split inside a run of any other code is suspicious.
    pub fn is_repeatable(&self) -> bool {
        match self {
            Code::RelationUpdate
            | Code::RelationSelfDestruct
            | Code::SaveForm
            | Code::FinishForm
            | Code::LeaveForm => true,
            Code::Resume
            | Code::Pause
            | Code::EnterPrompt
            | Code::LeavePrompt
            | Code::ConstraintContravened
            | Code::RelationCreate
            | Code::BeginForm
            | Code::Other(_) => false,
        }
    }
}

impl From<&str> for Code {
    fn from(code: &str) -> Self {
        match code {
            "oR" => Code::Resume,
            "oP" => Code::Pause,
            "EP" => Code::EnterPrompt,
            "LP" => Code::LeavePrompt,
            "CC" => Code::ConstraintContravened,
            "SF" => Code::SaveForm,
            "rC" => Code::RelationCreate,
            "rV" => Code::RelationUpdate,
            "rS" => Code::RelationSelfDestruct,
            "BF" => Code::BeginForm,
            "FF" => Code::FinishForm,
            "LF" => Code::LeaveForm,
            other => Code::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Xpaths the client writes for questionnaire-level (not prompt-level) rows
pub const BOOKEND_XPATHS: [&str; 4] = ["uC", "BF", "FF", "null"];

pub fn is_bookend_xpath(xpath: &str) -> bool {
    BOOKEND_XPATHS.contains(&xpath)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_round_trip_through_str() {
        for raw in ["oR", "oP", "EP", "LP", "CC", "SF", "rC", "rV", "rS", "BF", "FF", "LF"] {
            let code = Code::from(raw);
            assert!(!matches!(code, Code::Other(_)), "{raw} parsed as Other");
            assert_eq!(code.as_str(), raw);
        }
    }

    #[test]
    fn test_unknown_code_is_kept() {
        let code = Code::from("QR");
        assert_eq!(code, Code::Other("QR".to_string()));
        assert_eq!(code.to_string(), "QR");
    }

    #[test]
    fn test_code_sets() {
        assert!(Code::RelationSelfDestruct.is_relation());
        assert!(!Code::Resume.is_relation());
        assert!(Code::BeginForm.is_bookend());
        assert!(!Code::LeaveForm.is_bookend());
        assert!(Code::SaveForm.is_repeatable());
        assert!(!Code::EnterPrompt.is_repeatable());
        assert!(!Code::ConstraintContravened.is_repeatable());
    }

    #[test]
    fn test_serde_uses_wire_codes() {
        assert_eq!(serde_json::to_string(&Code::Resume).unwrap(), "\"oR\"");
        let other: Code = serde_json::from_str("\"zz\"").unwrap();
        assert_eq!(other, Code::Other("zz".to_string()));
        let pause: Code = serde_json::from_str("\"oP\"").unwrap();
        assert_eq!(pause, Code::Pause);
    }

    #[test]
    fn test_bookend_xpaths() {
        assert!(is_bookend_xpath("null"));
        assert!(is_bookend_xpath("uC"));
        assert!(!is_bookend_xpath("/data/age[1]"));
    }
}
