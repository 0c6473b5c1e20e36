//! ZFS facts

use super::{Fact, ShortFact};
use crate::error::Result;
use serde_json::{Map, Value};

/// Parse `zfs get -H` / `zpool get -H` output into `{name: {property: value}}`.
fn parse_properties(output: &[String]) -> Value {
    let mut datasets: Map<String, Value> = Map::new();
    for line in output {
        let mut fields = line.split('\t');
        let (Some(name), Some(property), Some(value)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let entry = datasets
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(props) = entry {
            props.insert(property.to_string(), Value::from(value));
        }
    }
    Value::Object(datasets)
}

fn filter_by_type(data: Value, kind: &str) -> Value {
    match data {
        Value::Object(datasets) => Value::Object(
            datasets
                .into_iter()
                .filter(|(_, props)| props.get("type").and_then(Value::as_str) == Some(kind))
                .collect(),
        ),
        other => other,
    }
}

pub struct ZfsPools;

impl Fact for ZfsPools {
    fn name(&self) -> &'static str {
        "ZfsPools"
    }

    fn command(&self, _args: &[String]) -> Result<String> {
        Ok("zpool get -H all".into())
    }

    fn process(&self, output: &[String]) -> Option<Value> {
        Some(parse_properties(output))
    }
}

pub struct ZfsDatasets;

impl Fact for ZfsDatasets {
    fn name(&self) -> &'static str {
        "ZfsDatasets"
    }

    fn command(&self, _args: &[String]) -> Result<String> {
        Ok("zfs get -H all".into())
    }

    fn process(&self, output: &[String]) -> Option<Value> {
        Some(parse_properties(output))
    }
}

pub struct ZfsFilesystems;

impl ShortFact for ZfsFilesystems {
    fn name(&self) -> &'static str {
        "ZfsFilesystems"
    }

    fn base(&self) -> &dyn Fact {
        &ZfsDatasets
    }

    fn process_data(&self, data: Value) -> Value {
        filter_by_type(data, "filesystem")
    }
}

pub struct ZfsSnapshots;

impl ShortFact for ZfsSnapshots {
    fn name(&self) -> &'static str {
        "ZfsSnapshots"
    }

    fn base(&self) -> &dyn Fact {
        &ZfsDatasets
    }

    fn process_data(&self, data: Value) -> Value {
        filter_by_type(data, "snapshot")
    }
}

pub struct ZfsVolumes;

impl ShortFact for ZfsVolumes {
    fn name(&self) -> &'static str {
        "ZfsVolumes"
    }

    fn base(&self) -> &dyn Fact {
        &ZfsDatasets
    }

    fn process_data(&self, data: Value) -> Value {
        filter_by_type(data, "volume")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output() -> Vec<String> {
        [
            "tank\ttype\tfilesystem\t-",
            "tank\tcompression\tlz4\tlocal",
            "tank/vm\ttype\tvolume\t-",
            "tank@daily\ttype\tsnapshot\t-",
            "malformed line",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
    }

    #[test]
    fn test_parse_properties_table() {
        let value = ZfsDatasets.process(&output()).unwrap();
        assert_eq!(value["tank"], json!({"type": "filesystem", "compression": "lz4"}));
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_short_facts_filter_by_type() {
        let data = ZfsDatasets.process(&output()).unwrap();
        let filesystems = ZfsFilesystems.process_data(data.clone());
        assert_eq!(filesystems.as_object().unwrap().keys().collect::<Vec<_>>(), vec!["tank"]);
        let snapshots = ZfsSnapshots.process_data(data.clone());
        assert!(snapshots.get("tank@daily").is_some());
        let volumes = ZfsVolumes.process_data(data);
        assert!(volumes.get("tank/vm").is_some());
        assert_eq!(ZfsVolumes.base().name(), "ZfsDatasets");
    }
}
