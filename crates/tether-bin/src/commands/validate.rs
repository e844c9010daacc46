// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use serde::Serialize;
use tether_config::TetherConfig;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Result of validating a configuration file.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Always `true`; invalid files are reported as errors.
    pub valid: bool,
    /// The validated file.
    pub config_path: String,
    /// Gateway ID.
    pub gateway_id: String,
    /// Gateway name.
    pub gateway_name: String,
    /// OPC UA endpoint URL.
    pub opcua_endpoint: String,
    /// MQTT broker `host:port`.
    pub mqtt_broker: String,
    /// Topic prefix.
    pub topic_prefix: String,
    /// Configured QoS.
    pub qos: u8,
    /// Number of configured nodes.
    pub node_count: usize,
    /// Whether the simulator is enabled in the file.
    pub simulator_enabled: bool,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// The parsed configuration with secrets masked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<TetherConfig>,
}

impl ValidationReport {
    /// Builds a report for a validated configuration.
    pub fn new(config_path: impl Into<String>, config: &TetherConfig, show_config: bool) -> Self {
        Self {
            valid: true,
            config_path: config_path.into(),
            gateway_id: config.gateway.id.clone(),
            gateway_name: config.gateway.name.clone(),
            opcua_endpoint: config.opcua.endpoint.clone(),
            mqtt_broker: config.mqtt.settings().broker_address(),
            topic_prefix: config.mqtt.topic_prefix.clone(),
            qos: config.mqtt.qos,
            node_count: config.nodes.len(),
            simulator_enabled: config.simulator.enabled,
            warnings: collect_warnings(config),
            config: show_config.then(|| config.redacted()),
        }
    }
}

fn collect_warnings(config: &TetherConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.nodes.is_empty() {
        warnings.push("No nodes configured; nothing will be published".to_string());
    }

    if config.mqtt.password.is_some() && config.mqtt.username.is_none() {
        warnings.push("MQTT password is set without a username and will be ignored".to_string());
    }

    if config.simulator.enabled && config.simulator.sensors.is_empty() {
        warnings.push("Simulator is enabled but has no sensors".to_string());
    }

    for node in config.nodes.iter().filter(|node| !node.writable) {
        if config.simulator.sensors.iter().any(|s| s.node == node.id) {
            warnings.push(format!(
                "Node {} is read-only; simulated readings for it will be refused",
                node.id
            ));
        }
    }

    warnings
}

/// Renders a report in the requested format.
pub fn render_report(report: &ValidationReport, format: OutputFormat) -> BinResult<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| BinError::runtime(format!("Failed to render report: {}", e))),
        OutputFormat::Toml => toml::to_string_pretty(report)
            .map_err(|e| BinError::runtime(format!("Failed to render report: {}", e))),
    }
}

fn render_text(report: &ValidationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("✓ Configuration is valid: {}\n\n", report.config_path));
    out.push_str("Summary:\n");
    out.push_str(&format!("  Gateway ID:     {}\n", report.gateway_id));
    out.push_str(&format!("  Gateway Name:   {}\n", report.gateway_name));
    out.push_str(&format!("  OPC UA:         {}\n", report.opcua_endpoint));
    out.push_str(&format!("  MQTT Broker:    {}\n", report.mqtt_broker));
    out.push_str(&format!("  Topic Prefix:   {}\n", report.topic_prefix));
    out.push_str(&format!("  QoS:            {}\n", report.qos));
    out.push_str(&format!("  Nodes:          {}\n", report.node_count));
    out.push_str(&format!(
        "  Simulator:      {}\n",
        if report.simulator_enabled { "enabled" } else { "disabled" }
    ));

    if !report.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for warning in &report.warnings {
            out.push_str(&format!("  ⚠ {}\n", warning));
        }
    }

    if let Some(config) = &report.config {
        out.push_str("\nParsed configuration:\n");
        match serde_json::to_string_pretty(config) {
            Ok(json) => out.push_str(&json),
            Err(_) => out.push_str("(serialization error)"),
        }
        out.push('\n');
    }

    out
}

/// Executes the `validate` command to validate configuration.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;

    if !config_path.exists() {
        return Err(BinError::Configuration(format!(
            "Configuration file not found: {}",
            config_path.display()
        )));
    }

    let config = tether_config::load_config(config_path)
        .map_err(|e| BinError::from(e).with_context("Configuration validation failed"))?;

    let report = ValidationReport::new(
        config_path.display().to_string(),
        &config,
        args.show_config,
    );
    print!("{}", render_report(&report, args.format)?);
    if args.format != OutputFormat::Text {
        println!();
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
