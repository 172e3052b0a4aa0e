mod devices;

use clap::{App, Arg};
use devices::{NullAudioSink, SilenceSource, TerminalSink, TestPatternSource};
use prism::net::channel::{CloseReason, Session, SessionConfig};
use prism::net::handshake::AuthConfig;
use prism::pipeline::{self, PipelineConfig};
use quartz::config::Config;
use quartz::identity::{IdentityKeys, KeyRef};
use quartz::logging;
use std::process;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_IO: i32 = 2;
const EXIT_AUTH: i32 = 3;

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let matches = App::new("glyphcast-client")
        .version("0.1.0")
        .about("Connects to a glyphcast conferencing server.")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
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
                .help("Server address; IPv6 in brackets ([::1])")
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
            Arg::with_name("server-key")
                .long("server-key")
                .value_name("KEY")
                .help("Pin the expected server identity (hex or ssh-ed25519)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("name")
                .long("name")
                .value_name("NAME")
                .help("Display name shown to other participants")
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
                eprintln!("glyphcast-client: {}", err);
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
                eprintln!("glyphcast-client: invalid port {}", port);
                return EXIT_CONFIG;
            }
        }
    }
    if let Some(key) = matches.value_of("key") {
        config.crypto.key = Some(key.to_string());
    }
    if let Some(server_key) = matches.value_of("server-key") {
        config.client.server_key = Some(server_key.to_string());
    }
    if let Some(name) = matches.value_of("name") {
        config.client.name = name.to_string();
    }
    if matches.is_present("no-encrypt") {
        config.crypto.no_encrypt = true;
    }

    let log = logging::init(&config.logging);

    let auth = match build_auth(&config) {
        Ok(auth) => auth,
        Err(message) => {
            eprintln!("glyphcast-client: {}", message);
            return EXIT_CONFIG;
        }
    };

    let endpoint = match config.network.endpoint() {
        Ok(endpoint) => endpoint,
        Err(err) => {
            eprintln!("glyphcast-client: {}", err);
            return EXIT_CONFIG;
        }
    };

    let session_config = SessionConfig::from_network(&config.network, !config.crypto.no_encrypt);

    let session = match Session::connect(&endpoint, auth, session_config, &log) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("glyphcast-client: connect {}: {}", endpoint, err);
            return EXIT_IO;
        }
    };

    let pipeline_config = PipelineConfig::from_config(&config);

    let video_source = TestPatternSource::new(80, 24, &config.palette.chars, 10);
    let audio_source = SilenceSource::new(config.audio.sample_rate, config.audio.frame_samples);

    let reason = pipeline::run(
        session,
        Box::new(video_source),
        Box::new(audio_source),
        Box::new(TerminalSink::new()),
        Box::new(NullAudioSink),
        pipeline_config,
        &log,
    );

    exit_code(reason)
}

fn build_auth(config: &Config) -> Result<AuthConfig, String> {
    let expected_server = match &config.client.server_key {
        Some(literal) => match KeyRef::parse(literal).map_err(|err| err.to_string())? {
            KeyRef::Public(key) => Some(key),
            KeyRef::Remote { service, name } => {
                return Err(format!(
                    "remote key reference {}:{} requires a key resolver, none is bundled",
                    service, name
                ));
            }
            KeyRef::Password(_) => {
                return Err("server key must be key material, not a password".to_string());
            }
        },
        None => None,
    };

    let key_ref = match &config.crypto.key {
        Some(literal) => Some(KeyRef::parse(literal).map_err(|err| err.to_string())?),
        None => None,
    };

    match key_ref {
        Some(KeyRef::Password(password)) => Ok(AuthConfig::Password(password)),
        Some(KeyRef::Public(seed)) => Ok(AuthConfig::PubKey {
            identity: IdentityKeys::from_seed(&seed),
            allowlist: None,
            expected_server,
        }),
        Some(KeyRef::Remote { service, name }) => Err(format!(
            "remote key reference {}:{} requires a key resolver, none is bundled",
            service, name
        )),
        None => Ok(AuthConfig::PubKey {
            identity: IdentityKeys::generate(),
            allowlist: None,
            expected_server,
        }),
    }
}

/// A handshake failure prints a single diagnostic line naming the cause and maps
/// to the authentication exit code; everything else is an orderly or I/O ending.
fn exit_code(reason: CloseReason) -> i32 {
    match reason {
        CloseReason::Requested | CloseReason::ByeReceived | CloseReason::PeerClosed => EXIT_OK,
        CloseReason::HandshakeFailed(cause) => {
            eprintln!("glyphcast-client: {}", cause.describe());
            EXIT_AUTH
        }
        CloseReason::Timeout => {
            eprintln!("glyphcast-client: timeout");
            EXIT_IO
        }
        CloseReason::Protocol(kind) => {
            eprintln!("glyphcast-client: protocol error: {:?}", kind);
            EXIT_IO
        }
        CloseReason::Crypto(kind) => {
            eprintln!("glyphcast-client: crypto error: {:?}", kind);
            EXIT_AUTH
        }
        CloseReason::Io(kind) => {
            eprintln!("glyphcast-client: io error: {:?}", kind);
            EXIT_IO
        }
    }
}
