use clap::{App, Arg};
use prism::net::channel::SessionConfig;
use prism::net::handshake::AuthConfig;
use prism::net::hub;
use quartz::config::Config;
use quartz::identity::{IdentityKeys, KeyAllowList, KeyRef};
use quartz::logging;
use std::net::TcpListener;
use std::process;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_IO: i32 = 2;

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let matches = App::new("glyphcast-server")
        .version("0.1.0")
        .about("Runs the glyphcast conferencing server.")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("Path to the TOML config file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("strict-config")
                .long("strict-config")
                .help("Reject unknown config keys and sections"),
        )
        .arg(
            Arg::with_name("address")
                .long("address")
                .value_name("ADDR")
                .help("Bind address; IPv6 in brackets ([::1])")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .value_name("PORT")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("key")
                .long("key")
                .value_name("KEY")
                .help("Identity key seed (hex) or shared password")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("client-keys")
                .long("client-keys")
                .value_name("FILE")
                .help("Allowlist file, one ssh-ed25519 or hex entry per line")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no-encrypt")
                .long("no-encrypt")
                .help("Disable the record layer (tests and diagnostics only)"),
        )
        .get_matches();

    let strict = matches.is_present("strict-config");

    let mut config = match matches.value_of("config") {
        Some(path) => match Config::load(path, strict) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("glyphcast-server: {}", err);
                return EXIT_CONFIG;
            }
        },
        None => Config::default(),
    };

    if let Some(address) = matches.value_of("address") {
        config.network.address = address.to_string();
    }
    if let Some(port) = matches.value_of("port") {
        match port.parse::<u16>() {
            Ok(port) => config.network.port = port,
            Err(_) => {
                eprintln!("glyphcast-server: invalid port {}", port);
                return EXIT_CONFIG;
            }
        }
    }
    if let Some(key) = matches.value_of("key") {
        config.crypto.key = Some(key.to_string());
    }
    if let Some(path) = matches.value_of("client-keys") {
        config.server.client_keys = Some(path.to_string());
    }
    if matches.is_present("no-encrypt") {
        config.crypto.no_encrypt = true;
    }

    let log = logging::init(&config.logging);

    let auth = match build_auth(&config, &log) {
        Ok(auth) => auth,
        Err(message) => {
            eprintln!("glyphcast-server: {}", message);
            return EXIT_CONFIG;
        }
    };

    let endpoint = match config.network.endpoint() {
        Ok(endpoint) => endpoint,
        Err(err) => {
            eprintln!("glyphcast-server: {}", err);
            return EXIT_CONFIG;
        }
    };

    let listener = match TcpListener::bind(endpoint) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("glyphcast-server: bind {}: {}", endpoint, err);
            return EXIT_IO;
        }
    };

    let session_config = SessionConfig::from_network(&config.network, !config.crypto.no_encrypt);
    let max_clients = usize::from(config.server.max_clients);

    match hub::serve(listener, auth, session_config, max_clients, &log) {
        Ok(()) => EXIT_OK,
        Err(err) => {
            eprintln!("glyphcast-server: {}", err);
            EXIT_IO
        }
    }
}

/// Resolves the server's authentication material from config and CLI.
fn build_auth(config: &Config, log: &logging::Logger) -> Result<AuthConfig, String> {
    let allowlist = match &config.server.client_keys {
        Some(path) => Some(
            KeyAllowList::from_file(path).map_err(|err| format!("client keys {}: {}", path, err))?,
        ),
        None => None,
    };

    let key_ref = match &config.crypto.key {
        Some(literal) => Some(KeyRef::parse(literal).map_err(|err| err.to_string())?),
        None => None,
    };

    match key_ref {
        Some(KeyRef::Password(password)) => {
            if allowlist.is_some() {
                logging::warn!(log, "client allowlist is ignored in password mode");
            }
            Ok(AuthConfig::Password(password))
        }
        Some(KeyRef::Public(seed)) => {
            let identity = IdentityKeys::from_seed(&seed);
            logging::info!(log, "server identity"; "public_key" => identity.public_hex());

            Ok(AuthConfig::PubKey {
                identity,
                allowlist,
                expected_server: None,
            })
        }
        Some(KeyRef::Remote { service, name }) => Err(format!(
            "remote key reference {}:{} requires a key resolver, none is bundled",
            service, name
        )),
        None => {
            let identity = IdentityKeys::generate();
            logging::info!(log, "generated throwaway server identity";
                           "public_key" => identity.public_hex());

            Ok(AuthConfig::PubKey {
                identity,
                allowlist,
                expected_server: None,
            })
        }
    }
}
