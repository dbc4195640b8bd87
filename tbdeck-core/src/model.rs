use serde::{Deserialize, Deserializer, Serialize};

/// Server-assigned identifier of a running instance
pub type InstanceName = String;

/// Snapshot of one remote instance as reported by the control plane.
///
/// Two models are equal when name, logdir and reload time all match; the
/// manager relies on this to decide whether a poll changed anything.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: InstanceName,
    pub logdir: String,
    /// Epoch seconds of the last reload, `None` until the first reload
    #[serde(default, deserialize_with = "deserialize_reload_time")]
    pub reload_time: Option<f64>,
}

impl Model {
    pub fn new(name: impl Into<String>, logdir: impl Into<String>, reload_time: Option<f64>) -> Self {
        Self {
            name: name.into(),
            logdir: logdir.into(),
            reload_time,
        }
    }

    /// Label shown for the instance in lists
    pub fn label(&self) -> String {
        format!("tensorboard/{}", self.name)
    }
}

/// Older servers send the reload time as a string, newer ones as a number.
fn deserialize_reload_time<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(t)) => Ok(Some(t)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid reload_time: {:?}", s))),
    }
}

/// Format epoch seconds as HH:MM:SS (UTC) for display
pub fn format_reload_time(reload_time: Option<f64>) -> String {
    match reload_time {
        Some(t) if t.is_finite() && t >= 0.0 => {
            let secs = t as u64;
            let hours = (secs / 3600) % 24;
            let minutes = (secs / 60) % 60;
            let seconds = secs % 60;
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        }
        Some(_) => "??:??:??".to_string(),
        None => "never".to_string(),
    }
}
