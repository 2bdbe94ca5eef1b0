use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(TriageStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl TriageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Lifecycle order: pending → processing → completed.
    /// `failed` is reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: TriageStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            (Self::Processing, Self::Completed) => true,
            (Self::Pending | Self::Processing, Self::Failed) => true,
            _ => false,
        }
    }
}

str_enum!(ArtifactKind {
    Document => "document",
    Image => "image",
    Other => "other",
});

impl ArtifactKind {
    /// Kind declared from the file extension: `.pdf` is a document,
    /// `.jpg`/`.jpeg`/`.png` an image, anything else is other.
    pub fn from_filename(name: &str) -> Self {
        let ext = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => Self::Document,
            Some("jpg" | "jpeg" | "png") => Self::Image,
            _ => Self::Other,
        }
    }
}

str_enum!(DocumentStatus {
    Completed => "completed",
    FailedDownload => "failed_download",
    UnsupportedKind => "unsupported_kind",
    FailedPdfConversion => "failed_pdf_conversion",
    FailedImageDecode => "failed_image_decode",
    NoPages => "no_pages",
    Cancelled => "cancelled",
});

impl DocumentStatus {
    /// True when the document produced pages and went through extraction.
    pub fn was_normalized(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

str_enum!(UrgencyLevel {
    Low => "low",
    Medium => "medium",
    High => "high",
});
