// Channel lists come in two flavors. The laboratory text format, one `key: value` per
// line, e.g.
//
//   comment: Bake out
//   autorange: yes
//   mass-scan-interval: 600
//   ms_channel: masslabel, M18, speed, 11, mass, 18, amp_range, 5
//   meta_channel: host, rasppi12, port, 9000, label, Pirani, command, read_pressure
//   compound_channel: host, rasppi19, port, 9990, command, read_all, label, T1, position, 0
//
// and YAML with the same structure as `ChannelList`. The file extension picks the format.
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::autorange::RangeCode;
use super::error::ChannelListError;
use super::instrument::ChannelSetup;

/// Run-level flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub comment: String,
    #[serde(default)]
    pub autorange: bool,
    /// Seconds between interleaved sweeps during a mass-time run
    #[serde(default)]
    pub mass_scan_interval: Option<f64>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsChannel {
    pub masslabel: String,
    pub mass: f64,
    pub speed: u8,
    pub amp_range: RangeCode,
    #[serde(default = "yes")]
    pub enabled: bool,
}

impl MsChannel {
    pub fn setup(&self) -> ChannelSetup {
        ChannelSetup {
            mass: self.mass,
            speed: self.speed,
            range: self.amp_range,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaChannel {
    pub label: String,
    pub host: String,
    pub port: u16,
    pub command: String,
    /// Seconds between polls; overrides the poller period
    #[serde(default)]
    pub repeat_interval: Option<f64>,
    #[serde(default)]
    pub measurement_type: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundField {
    pub label: String,
    pub position: usize,
    #[serde(default)]
    pub measurement_type: Option<u8>,
}

/// One request whose reply carries several channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundChannel {
    pub host: String,
    pub port: u16,
    pub command: String,
    #[serde(default)]
    pub repeat_interval: Option<f64>,
    pub fields: Vec<CompoundField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelList {
    pub run: RunSettings,
    #[serde(default)]
    pub ms: Vec<MsChannel>,
    #[serde(default)]
    pub meta: Vec<MetaChannel>,
    #[serde(default)]
    pub compound: Vec<CompoundChannel>,
}

impl ChannelList {
    /// Read a channel list, as YAML for `.yml`/`.yaml` files and as the text format otherwise
    pub fn read_channel_list_file(path: &Path) -> Result<Self, ChannelListError> {
        if !path.exists() {
            return Err(ChannelListError::BadFilePath(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => Ok(serde_yaml::from_str::<Self>(&contents)?),
            _ => Self::parse_text(&contents),
        }
    }

    pub fn parse_text(contents: &str) -> Result<Self, ChannelListError> {
        let mut list = Self::default();
        for (index, raw) in contents.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (key, value) = trimmed
                .split_once(':')
                .ok_or(ChannelListError::BadLine { line })?;
            let key = key.trim().to_lowercase();
            let value = value.trim();
            match key.as_str() {
                "comment" => list.run.comment = value.to_string(),
                "autorange" => list.run.autorange = parse_flag(line, &key, value)?,
                "mass-scan-interval" => {
                    list.run.mass_scan_interval = Some(parse_value(line, &key, value)?)
                }
                "ms_channel" => {
                    let params = Params::new(line, value)?;
                    list.ms.push(MsChannel {
                        masslabel: params.get("masslabel")?.to_string(),
                        mass: params.parse("mass")?,
                        speed: params.parse("speed")?,
                        amp_range: RangeCode(params.parse("amp_range")?),
                        enabled: params.flag_or("enabled", true)?,
                    });
                }
                "meta_channel" => {
                    let params = Params::new(line, value)?;
                    list.meta.push(MetaChannel {
                        label: params.get("label")?.to_string(),
                        host: params.get("host")?.to_string(),
                        port: params.parse("port")?,
                        command: params.get("command")?.to_string(),
                        repeat_interval: params.parse_optional("repeat_interval")?,
                        measurement_type: params.parse_optional("measurement_type")?,
                    });
                }
                "compound_channel" => {
                    let params = Params::new(line, value)?;
                    let host = params.get("host")?;
                    let port: u16 = params.parse("port")?;
                    let command = params.get("command")?;
                    let repeat_interval = params.parse_optional("repeat_interval")?;
                    let field = CompoundField {
                        label: params.get("label")?.to_string(),
                        position: params.parse("position")?,
                        measurement_type: params.parse_optional("measurement_type")?,
                    };
                    match list.compound.iter_mut().find(|c| {
                        c.host == host && c.port == port && c.command == command
                    }) {
                        Some(existing) => existing.fields.push(field),
                        None => list.compound.push(CompoundChannel {
                            host: host.to_string(),
                            port,
                            command: command.to_string(),
                            repeat_interval,
                            fields: vec![field],
                        }),
                    }
                }
                _ => return Err(ChannelListError::UnknownKey { line, key }),
            }
        }
        Ok(list)
    }

    /// Group meta channels by their poll period, shortest period first
    pub fn meta_groups(&self, default_period: Duration) -> Vec<(Duration, Vec<MetaChannel>)> {
        let mut groups: FxHashMap<Duration, Vec<MetaChannel>> = FxHashMap::default();
        for channel in self.meta.iter() {
            let period = period_or(channel.repeat_interval, default_period);
            groups.entry(period).or_default().push(channel.clone());
        }
        let mut groups: Vec<_> = groups.into_iter().collect();
        groups.sort_by_key(|(period, _)| *period);
        groups
    }
}

/// Convert an optional period in seconds, falling back to `default` when unset or invalid
pub fn period_or(seconds: Option<f64>, default: Duration) -> Duration {
    seconds
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .filter(|d| !d.is_zero())
        .unwrap_or(default)
}

fn parse_flag(line: usize, key: &str, value: &str) -> Result<bool, ChannelListError> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err(ChannelListError::BadValue {
            line,
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_value<T: FromStr>(line: usize, key: &str, value: &str) -> Result<T, ChannelListError> {
    value.parse::<T>().map_err(|_| ChannelListError::BadValue {
        line,
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Comma separated `key, value, key, value` parameters of a channel line
struct Params<'a> {
    line: usize,
    map: FxHashMap<String, &'a str>,
}

impl<'a> Params<'a> {
    fn new(line: usize, value: &'a str) -> Result<Self, ChannelListError> {
        let entries: Vec<&str> = value.split(',').map(str::trim).collect();
        if entries.len() % 2 != 0 {
            return Err(ChannelListError::BadLine { line });
        }
        let map = entries
            .chunks(2)
            .map(|pair| (pair[0].to_lowercase(), pair[1]))
            .collect();
        Ok(Self { line, map })
    }

    fn get(&self, key: &str) -> Result<&'a str, ChannelListError> {
        self.map
            .get(key)
            .copied()
            .ok_or_else(|| ChannelListError::MissingKey {
                line: self.line,
                key: key.to_string(),
            })
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<T, ChannelListError> {
        parse_value(self.line, key, self.get(key)?)
    }

    fn parse_optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ChannelListError> {
        match self.map.get(key) {
            Some(value) => Ok(Some(parse_value(self.line, key, value)?)),
            None => Ok(None),
        }
    }

    fn flag_or(&self, key: &str, default: bool) -> Result<bool, ChannelListError> {
        match self.map.get(key) {
            Some(value) => parse_flag(self.line, key, value),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# bake out of the main chamber
comment: Bake out
autorange: yes
ms_channel: masslabel, M2, speed, 11, mass, 2, amp_range, 5
ms_channel: masslabel, M18, speed, 11, mass, 18, amp_range, 7, enabled, no
meta_channel: host, rasppi12, port, 9000, label, Pirani, command, read_pressure
meta_channel: host, rasppi12, port, 9000, label, Ion gauge, command, read_ion#raw, repeat_interval, 1
compound_channel: host, rasppi19, port, 9990, command, read_all, label, T1, position, 0
compound_channel: host, rasppi19, port, 9990, command, read_all, label, T2, position, 2
";

    #[test]
    fn test_parse_text() {
        let list = ChannelList::parse_text(SAMPLE).unwrap();
        assert_eq!(list.run.comment, "Bake out");
        assert!(list.run.autorange);
        assert_eq!(list.run.mass_scan_interval, None);
        assert_eq!(list.ms.len(), 2);
        assert_eq!(list.ms[1].amp_range, RangeCode(7));
        assert!(!list.ms[1].enabled);
        assert_eq!(list.meta.len(), 2);
        assert_eq!(list.meta[1].repeat_interval, Some(1.0));
        assert_eq!(list.compound.len(), 1);
        assert_eq!(list.compound[0].fields[1].position, 2);
    }

    #[test]
    fn test_meta_groups() {
        let list = ChannelList::parse_text(SAMPLE).unwrap();
        let groups = list.meta_groups(Duration::from_secs(5));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Duration::from_secs(1));
        assert_eq!(groups[0].1[0].label, "Ion gauge");
        assert_eq!(groups[1].0, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_key_reports_line() {
        let text = "comment: x\nms_channel: masslabel, M2, speed, 11, amp_range, 5\n";
        match ChannelList::parse_text(text) {
            Err(ChannelListError::MissingKey { line, key }) => {
                assert_eq!(line, 2);
                assert_eq!(key, "mass");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_bad_value() {
        let text = "autorange: maybe\n";
        assert!(matches!(
            ChannelList::parse_text(text),
            Err(ChannelListError::BadValue { line: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_key() {
        assert!(matches!(
            ChannelList::parse_text("colour: blue"),
            Err(ChannelListError::UnknownKey { line: 1, .. })
        ));
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.yml");
        let list = ChannelList::parse_text(SAMPLE).unwrap();
        std::fs::write(&path, serde_yaml::to_string(&list).unwrap()).unwrap();
        let loaded = ChannelList::read_channel_list_file(&path).unwrap();
        assert_eq!(loaded, list);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ChannelList::read_channel_list_file(Path::new("/nonexistent/channels.txt")),
            Err(ChannelListError::BadFilePath(_))
        ));
    }
}
