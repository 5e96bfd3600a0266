/*
Copyright 2021 Chengyuan Ma

Permission is hereby granted, free of charge, to any person obtaining a copy of this software and
associated documentation files (the "Software"), to deal in the Software without restriction,
including without limitation the rights to use, copy, modify, merge, publish, distribute, sub-
-license, and/or sell copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all copies or substantial
portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT
NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NON-
-INFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES
OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.
*/

use crate::sim::SimConfig;
use anyhow::{Context, Result};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

/// Parameters of one KCP control block.
///
/// Every field may be omitted from a config file, in which case the default below is used.
#[derive(Clone, Debug, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[serde(default)]
pub struct KcpConfig {
    #[derivative(Default(value = "1400"))]
    pub mtu: u32,
    #[derivative(Default(value = "32"))]
    pub send_window: u16,
    #[derivative(Default(value = "128"))]
    pub recv_window: u16,
    pub nodelay: bool,
    /// Update interval (ms).
    #[derivative(Default(value = "100"))]
    pub interval: u32,
    /// Skip-ACK count that triggers a fast resend; 0 disables fast resend.
    pub fast_resend: u32,
    pub no_congestion_control: bool,
    #[derivative(Default(value = "5"))]
    pub fast_resend_limit: u32,
    /// Overrides the RTO floor implied by `nodelay`.
    pub rto_min: Option<u32>,
    /// Extra copies sent with every data segment.
    pub redundancy: u32,
}

/// The four canned setups compared by the `ekcp-sim` demo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Stock KCP: no nodelay, no fast resend, congestion control on.
    Default,
    /// Congestion control off.
    Normal,
    /// Nodelay, fast resend after two skips, congestion control off.
    Fast,
    /// Fast mode plus one redundant copy of every data segment.
    Redundancy,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Default, Mode::Normal, Mode::Fast, Mode::Redundancy];

    pub fn name(self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::Normal => "normal",
            Mode::Fast => "fast",
            Mode::Redundancy => "redundancy",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Mode::ALL
            .iter()
            .copied()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown mode {:?}", s))
    }
}

impl KcpConfig {
    /// Settings for `mode` with 128-segment windows and a 10 ms interval on top of the defaults.
    pub fn for_mode(mode: Mode) -> Self {
        let base = KcpConfig {
            send_window: 128,
            recv_window: 128,
            interval: 10,
            ..Default::default()
        };
        match mode {
            Mode::Default => base,
            Mode::Normal => KcpConfig {
                no_congestion_control: true,
                ..base
            },
            Mode::Fast => KcpConfig {
                nodelay: true,
                fast_resend: 2,
                no_congestion_control: true,
                ..base
            },
            Mode::Redundancy => KcpConfig {
                redundancy: 1,
                ..KcpConfig::for_mode(Mode::Fast)
            },
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub kcp: KcpConfig,
    pub sim: SimConfig,
}

pub fn load_config_from_file(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("cannot open config file {}", path.display()))?;
    let config = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("error parsing config json {}", path.display()))?;
    Ok(config)
}
