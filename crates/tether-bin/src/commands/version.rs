// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Executes the `version` command to display version information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("tether - OPC UA to MQTT telemetry gateway");
    println!();
    println!("Version Information:");
    println!("  tether-bin:    {}", crate::VERSION);
    println!("  tether-config: {}", tether_config::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:        {}", std::env::consts::ARCH);
    println!("  OS:            {}", std::env::consts::OS);
    println!();
    println!("Features:");
    println!(
        "  OPC UA server: {}",
        if cfg!(feature = "opcua-server") { "enabled" } else { "loopback only" }
    );
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
