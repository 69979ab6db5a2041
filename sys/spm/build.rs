// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use serde::Deserialize;

/// Sizing knobs for the partition manager, passed in by the image builder as
/// RON in `SPM_CONFIG`. Any field left out takes its default.
#[derive(Deserialize)]
#[serde(default)]
struct SpmConfig {
    /// Number of connection records in the pool.
    conn_handle_max_num: usize,
    /// Width of the rotating salt mixed into user handles.
    handle_salt_bits: u32,
    max_partitions: usize,
    max_services: usize,
}

impl Default for SpmConfig {
    fn default() -> Self {
        Self {
            conn_handle_max_num: 8,
            handle_salt_bits: 3,
            max_partitions: 16,
            max_services: 32,
        }
    }
}

/// Exposes the M-profile architecture version as `cfg(armv8m)` and friends.
/// Host builds get none of them.
fn expose_m_profile() {
    println!("cargo::rustc-check-cfg=cfg(armv6m, armv7m, armv8m)");
    let target = env::var("TARGET").unwrap_or_default();

    if target.starts_with("thumbv6m") {
        println!("cargo:rustc-cfg=armv6m");
    } else if target.starts_with("thumbv7m") || target.starts_with("thumbv7em")
    {
        println!("cargo:rustc-cfg=armv7m");
    } else if target.starts_with("thumbv8m") {
        println!("cargo:rustc-cfg=armv8m");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    expose_m_profile();

    println!("cargo:rerun-if-env-changed=SPM_CONFIG");
    let config: SpmConfig = match env::var("SPM_CONFIG") {
        Ok(text) => ron::de::from_str(&text)?,
        Err(env::VarError::NotPresent) => SpmConfig::default(),
        Err(e) => return Err(e.into()),
    };

    if config.conn_handle_max_num == 0 {
        return Err("conn_handle_max_num must not be zero".into());
    }
    if config.max_partitions == 0 || config.max_services == 0 {
        return Err("partition and service limits must not be zero".into());
    }

    let out = &PathBuf::from(env::var_os("OUT_DIR").ok_or("no OUT_DIR")?);
    let mut file = File::create(out.join("config.rs"))?;

    writeln!(file, "// See build.rs for details")?;
    writeln!(
        file,
        "pub const CONN_HANDLE_MAX_NUM: usize = {};",
        config.conn_handle_max_num
    )?;
    writeln!(
        file,
        "pub const HANDLE_SALT_BITS: u32 = {};",
        config.handle_salt_bits
    )?;
    writeln!(
        file,
        "pub const MAX_PARTITIONS: usize = {};",
        config.max_partitions
    )?;
    writeln!(
        file,
        "pub const MAX_SERVICES: usize = {};",
        config.max_services
    )?;

    Ok(())
}
