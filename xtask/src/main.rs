// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use clap::{Parser, Subcommand};
use fs_err as fs;
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    GenerateTestData,
}

#[derive(Clone, Copy)]
enum KeyType {
    Rsa2048,
    EcdsaP256,
}

impl KeyType {
    fn newkey_args(self) -> &'static [&'static str] {
        match self {
            KeyType::Rsa2048 => &["-newkey", "rsa:2048"],
            KeyType::EcdsaP256 => &[
                "-newkey",
                "ec",
                "-pkeyopt",
                "ec_paramgen_curve:prime256v1",
            ],
        }
    }
}

/// One self-signed certificate and its PKCS#8 key.
struct Identity {
    name: &'static str,
    subject: &'static str,
    key_type: KeyType,
    /// Fixed so that tests can assert on it.
    serial: Option<&'static str>,
}

const IDENTITIES: &[Identity] = &[
    Identity {
        name: "signer",
        subject: "/CN=Test Signer/O=Acme Corp/C=US",
        key_type: KeyType::Rsa2048,
        serial: Some("0x743cb60894534e56c17e648c5f42506c21bc67d4"),
    },
    Identity {
        name: "timestamp",
        subject: "/CN=Test Timestamper/O=Acme Corp",
        key_type: KeyType::Rsa2048,
        serial: None,
    },
    Identity {
        name: "ecdsa",
        subject: "/CN=Catalog Signer/OU=Catalog Publishing",
        key_type: KeyType::EcdsaP256,
        serial: None,
    },
];

struct Paths {
    test_data: PathBuf,
}

impl Paths {
    fn new() -> Self {
        Self {
            test_data: PathBuf::from("sigtrust/tests/data"),
        }
    }

    fn cert_pem(&self, identity: &Identity) -> PathBuf {
        self.test_data.join(format!("{}_cert.pem", identity.name))
    }

    fn key_pem(&self, identity: &Identity) -> PathBuf {
        self.test_data.join(format!("{}_key.pem", identity.name))
    }
}

fn run_command(command: &mut Command) {
    println!("{}", format!("{command:?}").replace('"', ""));
    let status = command.status().unwrap();
    assert!(status.success());
}

fn generate_identity(paths: &Paths, identity: &Identity) {
    if paths.cert_pem(identity).exists() && paths.key_pem(identity).exists() {
        println!("skipping {} generation", identity.name);
        return;
    }

    let mut command = Command::new("openssl");
    command
        .args(["req", "-x509"])
        .args(identity.key_type.newkey_args())
        .args(["-subj", identity.subject, "-days", "3650"])
        // Turn off encryption so no password is needed.
        .arg("-nodes");
    if let Some(serial) = identity.serial {
        command.args(["-set_serial", serial]);
    }
    run_command(
        command
            .arg("-keyout")
            .arg(paths.key_pem(identity))
            .arg("-out")
            .arg(paths.cert_pem(identity)),
    );
}

fn generate_test_data() {
    let paths = Paths::new();
    fs::create_dir_all(&paths.test_data).unwrap();
    for identity in IDENTITIES {
        generate_identity(&paths, identity);
    }
}

fn main() {
    let cli = Cli::parse();

    match &cli.action {
        Action::GenerateTestData => generate_test_data(),
    }
}
