// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Init command - create a starter shipflow.yaml

use colored::Colorize;
use miette::Result;
use std::path::Path;

const TEMPLATE: &str = r#"version: "1"
name: "{name}"
environment: "production"

# How the first deploy escapes the infrastructure/image circularity.
# placeholder: provision the service against a pause image, repoint it
# after publish. Alternative:
#
# bootstrap:
#   policy: reorder
bootstrap:
  policy: placeholder

stages:
  - name: "test"
    action:
      type: test
      command: "make test"

  - name: "provision"
    action:
      type: provision
      dir: infra/
    depends_on:
      - test

  - name: "publish"
    action:
      type: publish
      context: .
      destination:
        from_output: registry_uri
    depends_on:
      - provision

  - name: "deploy"
    action:
      type: update_service
      service:
        from_output: service_id
    depends_on:
      - publish
"#;

/// Initialize a new shipflow project
pub async fn run(name: Option<String>, _verbose: bool) -> Result<()> {
    let path = Path::new("shipflow.yaml");

    if path.exists() {
        return Err(miette::miette!(
            "shipflow.yaml already exists; delete it first to re-initialize"
        ));
    }

    let name = match name {
        Some(name) => name,
        None => std::env::current_dir()
            .ok()
            .and_then(|d| d.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "app".to_string()),
    };

    std::fs::write(path, TEMPLATE.replace("{name}", &name))
        .map_err(|e| miette::miette!("Failed to write shipflow.yaml: {}", e))?;

    println!("{} Created shipflow.yaml for '{}'", "✓".green(), name.bold());
    println!();
    println!("Next steps:");
    println!("  1. Point the provision stage at your infrastructure directory");
    println!("  2. Export registry_uri and service_id as outputs there");
    println!("  3. {} to check the pipeline", "shipflow validate".cyan());
    println!("  4. {} to deploy", "shipflow run".cyan());

    Ok(())
}
