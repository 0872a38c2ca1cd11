//! 搜索状态的保存与加载
//! Saving and loading of the search state
//!
//! One line per group: `gateway cluster data_rate started currbest high low max_total`,
//! whitespace separated, floating-point values in scientific notation with 17
//! fractional digits.
//!
//! 每个分组一行，字段以空白分隔。

use super::group::GroupTable;
use crate::error::{Error, Result};
use crate::network::status::GatewayId;
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// 配置文件中的一行
/// One line of the configuration file
#[derive(Debug, Clone, PartialEq)]
pub struct SavedGroup {
    pub gateway: GatewayId,
    pub cluster: u8,
    pub data_rate: u8,
    pub started: bool,
    pub currbest: f64,
    pub high: f64,
    pub low: f64,
    pub max_total: f64,
}

/// 将所有分组的搜索状态写入文件（覆盖原内容）
/// Write the search state of every group to the file, truncating it
pub fn save_config_to_file(groups: &GroupTable, path: &Path) -> Result<()> {
    let mut contents = String::new();
    for ((gateway, cluster), state) in groups.iter() {
        for (data_rate, group) in state.groups.iter().enumerate() {
            let ot = &group.offered_traffic;
            let _ = writeln!(
                contents,
                "{} {} {} {} {:.17e} {:.17e} {:.17e} {:.17e}",
                gateway,
                cluster,
                data_rate,
                u8::from(ot.started),
                ot.currbest,
                ot.high,
                ot.low,
                group.max_total()
            );
        }
    }
    std::fs::write(path, contents).map_err(|source| Error::ConfigFile {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Saved congestion configuration");
    Ok(())
}

/// 读取并解析配置文件
/// Read and parse a configuration file
pub fn load_config_from_file(path: &Path) -> Result<Vec<SavedGroup>> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
        path: path.to_path_buf(),
        source,
    })?;

    let mut saved = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        saved.push(parse_line(line).map_err(|reason| Error::MalformedConfigLine {
            path: path.to_path_buf(),
            line: index + 1,
            reason,
        })?);
    }
    debug!(path = %path.display(), groups = saved.len(), "Loaded congestion configuration");
    Ok(saved)
}

fn parse_line(line: &str) -> std::result::Result<SavedGroup, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [gateway, cluster, data_rate, started, currbest, high, low, max_total] = fields[..] else {
        return Err(format!("expected 8 fields, found {}", fields.len()));
    };

    fn number<T: std::str::FromStr>(name: &str, value: &str) -> std::result::Result<T, String> {
        value
            .parse()
            .map_err(|_| format!("invalid {name} `{value}`"))
    }

    let started = match started {
        "0" | "false" => false,
        "1" | "true" => true,
        other => return Err(format!("invalid started flag `{other}`")),
    };

    Ok(SavedGroup {
        gateway: GatewayId(number("gateway", gateway)?),
        cluster: number("cluster", cluster)?,
        data_rate: number("data rate", data_rate)?,
        started,
        currbest: number("currbest", currbest)?,
        high: number("high", high)?,
        low: number("low", low)?,
        max_total: number("max total", max_total)?,
    })
}
