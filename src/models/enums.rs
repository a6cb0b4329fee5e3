use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field} value: {value}")]
pub struct InvalidEnumValue {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serialized as the string form so envelopes read the same as the CSV/JSON views.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::enums::InvalidEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err($crate::models::enums::InvalidEnumValue {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use str_enum;

str_enum!(
    /// Outcome of a direct numeric comparison against a reference range.
    ParameterStatus {
        Low => "LOW",
        Normal => "NORMAL",
        High => "HIGH",
        Unknown => "UNKNOWN",
        Missing => "MISSING",
    }
);

str_enum!(EnvelopeStatus {
    Success => "success",
    LowConfidence => "low_confidence",
    Error => "error",
});

str_enum!(
    /// Input classes recognized by the file router.
    InputCategory {
        Pdf => "pdf",
        RasterImage => "raster_image",
        StructuredJson => "structured_json",
        TabularCsv => "tabular_csv",
        PlainText => "plain_text",
        Unsupported => "unsupported",
    }
);

str_enum!(
    /// How a PDF was finally read.
    PdfRoute {
        DirectText => "direct_pdf_text",
        Scanned => "scanned_pdf",
    }
);

str_enum!(ErrorKind {
    UnsupportedType => "unsupported_type",
    RecognitionFailure => "recognition_failure",
    ValidationRejected => "validation_rejected",
    MalformedStructuredInput => "malformed_structured_input",
});

str_enum!(ExtractionPath {
    AnchorBased => "anchor_based",
    Table => "table",
    Classifier => "classifier",
});

impl ParameterStatus {
    /// Title-case label used by the classifier JSON view.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Normal => "Normal",
            Self::High => "High",
            Self::Unknown => "UNKNOWN",
            Self::Missing => "MISSING",
        }
    }
}

impl InputCategory {
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }

    pub fn needs_recognition(&self) -> bool {
        matches!(self, Self::RasterImage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parameter_status_round_trip() {
        for status in ParameterStatus::ALL {
            assert_eq!(ParameterStatus::from_str(status.as_str()).unwrap(), *status);
        }
        assert_eq!(ParameterStatus::Normal.as_str(), "NORMAL");
        assert_eq!(ParameterStatus::Normal.label(), "Normal");
    }

    #[test]
    fn envelope_status_serializes_as_snake_case() {
        let json = serde_json::to_string(&EnvelopeStatus::LowConfidence).unwrap();
        assert_eq!(json, "\"low_confidence\"");
        let back: EnvelopeStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EnvelopeStatus::LowConfidence);
    }

    #[test]
    fn invalid_value_names_the_enum() {
        let err = ErrorKind::from_str("crash").unwrap_err();
        assert_eq!(err.field, "ErrorKind");
        assert_eq!(err.value, "crash");
    }

    #[test]
    fn only_raster_images_need_recognition_up_front() {
        assert!(InputCategory::RasterImage.needs_recognition());
        assert!(!InputCategory::Pdf.needs_recognition());
        assert!(!InputCategory::Unsupported.is_supported());
        assert!(InputCategory::TabularCsv.is_supported());
    }
}
