use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl From<$name> for i64 {
            fn from(value: $name) -> i64 {
                value.0
            }
        }
    };
}

id_newtype!(AdminId);
id_newtype!(ProjectId);
id_newtype!(CertificateId);
id_newtype!(SkillId);
id_newtype!(MediaId);

/// The three rank-ordered admin collections. Each maps to one table whose
/// display order is a dense 0..n-1 `display_rank` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Projects,
    Certificates,
    Skills,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Projects => "projects",
            Collection::Certificates => "certificates",
            Collection::Skills => "skills",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Authenticated { admin_id: AdminId },
    Unauthenticated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
}
