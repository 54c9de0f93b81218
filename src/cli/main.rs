//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Deadprop.
//
// Deadprop is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Deadprop is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Deadprop. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::io::Read;
use std::mem;
use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::props::scope::SpecialProperties;
use crate::support::sysexits::*;
use crate::support::system_config::{ScopeConfig, SystemConfig};

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Print the value of a property.
    ///
    /// Reading a property stored in an old format rewrites it in the current
    /// one.
    Get(GetSubcommand),
    /// Set the value of a property.
    Set(SetSubcommand),
    /// Remove a property.
    Delete(DeleteSubcommand),
    /// List the names of all properties on a file.
    List(ListSubcommand),
    /// Rewrite every property on the given files in the current format.
    ///
    /// Normally properties are upgraded lazily when they are read. This can
    /// be used to do it all at once, for example before downgrading to a
    /// version of the server which cannot read older formats.
    Upgrade(UpgradeSubcommand),
    /// Dump the raw attributes making up the property store of a file.
    ///
    /// Unlike other commands, this does not stop at damaged attributes, so it
    /// can be used to find which attribute needs to be removed by hand.
    Inspect(InspectSubcommand),
}

impl Command {
    fn common_options(&mut self) -> CommonOptions {
        match *self {
            Command::Get(ref mut c) => mem::take(&mut c.common),
            Command::Set(ref mut c) => mem::take(&mut c.common),
            Command::Delete(ref mut c) => mem::take(&mut c.common),
            Command::List(ref mut c) => mem::take(&mut c.common),
            Command::Upgrade(ref mut c) => mem::take(&mut c.common),
            Command::Inspect(ref mut c) => mem::take(&mut c.common),
        }
    }
}

#[derive(StructOpt, Default)]
pub(super) struct CommonOptions {
    /// The configuration file to use
    /// [default: /etc/deadprop/deadprop.toml or
    /// /usr/local/etc/deadprop/deadprop.toml, if present]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Treat this property as shadowable, in addition to those from the
    /// configuration. Clark notation, e.g. '{DAV:}displayname'. Can be passed
    /// multiple times.
    #[structopt(long, number_of_values(1))]
    shadowable: Vec<String>,

    /// Treat this property as global, in addition to those from the
    /// configuration. Can be passed multiple times.
    #[structopt(long, number_of_values(1))]
    global: Vec<String>,
}

#[derive(StructOpt)]
pub(super) struct OwnerOptions {
    /// Act as this principal.
    ///
    /// Without --exact, private properties are read and written for this
    /// principal while shadowable and global properties follow the
    /// configured rules. Without --uid, only shared properties are visible.
    #[structopt(short, long)]
    pub(super) uid: Option<String>,

    /// Address exactly the property owned by --uid (or the shared one if
    /// --uid is absent), ignoring the shadowable and global rules.
    #[structopt(long)]
    pub(super) exact: bool,
}

#[derive(StructOpt)]
pub(super) struct GetSubcommand {
    #[structopt(flatten)]
    common: CommonOptions,
    #[structopt(flatten)]
    pub(super) owner: OwnerOptions,

    /// The file holding the properties.
    #[structopt(parse(from_os_str))]
    pub(super) path: PathBuf,

    /// The property name in Clark notation, e.g. '{DAV:}displayname'.
    pub(super) name: String,
}

#[derive(StructOpt)]
pub(super) struct SetSubcommand {
    #[structopt(flatten)]
    common: CommonOptions,
    #[structopt(flatten)]
    pub(super) owner: OwnerOptions,

    /// The file holding the properties.
    #[structopt(parse(from_os_str))]
    pub(super) path: PathBuf,

    /// The property name in Clark notation, e.g. '{DAV:}displayname'.
    pub(super) name: String,

    /// The new value, as an XML document whose root element is the property
    /// itself. "-" will read from stdin.
    #[structopt(default_value = "-")]
    pub(super) value: String,
}

#[derive(StructOpt)]
pub(super) struct DeleteSubcommand {
    #[structopt(flatten)]
    common: CommonOptions,
    #[structopt(flatten)]
    pub(super) owner: OwnerOptions,

    /// The file holding the properties.
    #[structopt(parse(from_os_str))]
    pub(super) path: PathBuf,

    /// The property name in Clark notation, e.g. '{DAV:}displayname'.
    pub(super) name: String,
}

#[derive(StructOpt)]
pub(super) struct ListSubcommand {
    #[structopt(flatten)]
    common: CommonOptions,
    #[structopt(flatten)]
    pub(super) owner: OwnerOptions,

    /// The file holding the properties.
    #[structopt(parse(from_os_str))]
    pub(super) path: PathBuf,
}

#[derive(StructOpt)]
pub(super) struct UpgradeSubcommand {
    #[structopt(flatten)]
    common: CommonOptions,

    /// The files to upgrade.
    #[structopt(parse(from_os_str), required = true)]
    pub(super) paths: Vec<PathBuf>,
}

#[derive(StructOpt)]
pub(super) struct InspectSubcommand {
    #[structopt(flatten)]
    common: CommonOptions,

    /// The file holding the properties.
    #[structopt(parse(from_os_str))]
    pub(super) path: PathBuf,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let mut cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let common = cmd.common_options();
    let mut system_config = load_system_config(common.config.as_deref());
    init_logging(&system_config);

    system_config.scope.merge(ScopeConfig {
        shadowable: common.shadowable,
        global: common.global,
    });
    let special = match system_config.scope.special_properties() {
        Ok(special) => special,
        Err(e) => die!(EX_CONFIG, "Bad property scope configuration: {}", e),
    };

    run(cmd, special);
}

fn run(cmd: Command, special: SpecialProperties) {
    match cmd {
        Command::Get(cmd) => super::props::get(cmd, special),
        Command::Set(cmd) => super::props::set(cmd, special),
        Command::Delete(cmd) => super::props::delete(cmd, special),
        Command::List(cmd) => super::props::list(cmd, special),
        Command::Upgrade(cmd) => super::props::upgrade(cmd),
        Command::Inspect(cmd) => super::props::inspect(cmd),
    }
}

fn load_system_config(explicit: Option<&Path>) -> SystemConfig {
    let path = match explicit {
        Some(path) => path.to_owned(),
        None => match ["/etc/deadprop", "/usr/local/etc/deadprop"]
            .iter()
            .map(|root| Path::new(root).join("deadprop.toml"))
            .find(|path| path.is_file())
        {
            Some(path) => path,
            None => return SystemConfig::default(),
        },
    };

    let mut system_config_toml = Vec::new();
    if let Err(e) = fs::File::open(&path)
        .and_then(|mut f| f.read_to_end(&mut system_config_toml))
    {
        die!(EX_CONFIG, "Error reading '{}': {}", path.display(), e);
    }

    let mut system_config: SystemConfig =
        match toml::from_slice(&system_config_toml) {
            Ok(config) => config,
            Err(e) => die!(
                EX_CONFIG,
                "Error in config file at '{}': {}",
                path.display(),
                e
            ),
        };

    // The logging configuration is relative to the config file
    if let (Some(log_config), Some(root)) =
        (system_config.logging.config.as_mut(), path.parent())
    {
        *log_config = root.join(&*log_config);
    }

    system_config
}

fn init_logging(system_config: &SystemConfig) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    // log4rs *or* syslog, since log4rs has no syslog appender of its own.
    if let Some(ref log_config_file) = system_config.logging.config {
        if let Err(e) = log4rs::init_file(
            log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            die!(
                EX_CONFIG,
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        // Carry on without logging if syslog is unavailable.
        if let Ok(logger) = syslog::unix(formatter) {
            let _ = log::set_boxed_logger(Box::new(
                syslog::BasicLogger::new(logger),
            ))
            .map(|_| log::set_max_level(log::LevelFilter::Info));
        }
    }
}
