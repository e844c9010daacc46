// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! tether - OPC UA to MQTT telemetry gateway.

use tether_bin::cli::Cli;
use tether_bin::error::report_error_and_exit;
use tether_bin::{commands, logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let file = logging::file_logging(&cli.config);
    let level = cli.resolve_log_level(file.as_ref()).to_string();
    if let Err(error) = logging::init_logging(&level, cli.resolve_log_format(file.as_ref())) {
        report_error_and_exit(error);
    }

    if let Err(error) = commands::execute(cli).await {
        report_error_and_exit(error);
    }
}
