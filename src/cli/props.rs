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

use std::io::{self, Read, Write};
use std::path::PathBuf;

use super::main::*;
use crate::props::{
    document::{Element, ValueSerializer, XmlSerializer},
    name::PropertyName,
    scope::SpecialProperties,
    store::PropertyStore,
};
use crate::support::{error::Error, sysexits::*};

fn or_die<T>(result: Result<T, Error>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => die!(Sysexit::from(&e), "{}", e),
    }
}

fn open(
    path: PathBuf,
    owner: &OwnerOptions,
    special: SpecialProperties,
) -> PropertyStore {
    if !path.exists() {
        die!(EX_NOINPUT, "'{}' does not exist", path.display());
    }

    PropertyStore::for_path(owner.uid.clone(), path)
        .with_special_properties(special)
}

fn parse_name(name: &str) -> PropertyName {
    or_die(name.parse())
}

pub(super) fn get(cmd: GetSubcommand, special: SpecialProperties) {
    let name = parse_name(&cmd.name);
    let mut store = open(cmd.path, &cmd.owner, special);

    let value = or_die(if cmd.owner.exact {
        store.get(&name, cmd.owner.uid.as_deref())
    } else {
        store.view().get(&name)
    });
    println!("{}", XmlSerializer.to_canonical_text(&value));

    // Persist any format upgrade the read triggered
    or_die(store.flush());
}

pub(super) fn set(cmd: SetSubcommand, special: SpecialProperties) {
    let name = parse_name(&cmd.name);
    let value = read_value(&cmd.value);
    if value.name != name {
        die!(
            EX_USAGE,
            "Value has root element {} but the property is {}",
            value.name,
            name
        );
    }

    let mut store = open(cmd.path, &cmd.owner, special);
    or_die(if cmd.owner.exact {
        store.set(name, value, cmd.owner.uid.as_deref())
    } else {
        store.view().set(name, value)
    });
    or_die(store.flush());
}

pub(super) fn delete(cmd: DeleteSubcommand, special: SpecialProperties) {
    let name = parse_name(&cmd.name);
    let mut store = open(cmd.path, &cmd.owner, special);

    or_die(if cmd.owner.exact {
        store.delete(&name, cmd.owner.uid.as_deref())
    } else {
        store.view().delete(&name)
    });
    or_die(store.flush());
}

pub(super) fn list(cmd: ListSubcommand, special: SpecialProperties) {
    let mut store = open(cmd.path, &cmd.owner, special);

    let mut names = or_die(if cmd.owner.exact {
        store.list(cmd.owner.uid.as_deref())
    } else {
        store.view().list()
    });
    names.sort();

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    for name in names {
        let _ = writeln!(stdout, "{}", name);
    }
}

pub(super) fn upgrade(cmd: UpgradeSubcommand) {
    let mut failed = None;
    for path in cmd.paths {
        if !path.exists() {
            eprintln!("'{}' does not exist", path.display());
            failed = Some(EX_NOINPUT);
            continue;
        }

        let display = path.display().to_string();
        let mut store = PropertyStore::for_path(None, path);
        match store.upgrade() {
            Ok(report) => println!(
                "{}: examined {}, rewrote {}, renamed {}, \
                 removed {} duplicates",
                display,
                report.examined,
                report.rewritten,
                report.renamed,
                report.duplicates,
            ),
            Err(e) => {
                eprintln!("{}: {}", display, e);
                failed = Some(Sysexit::from(&e));
            }
        }
    }

    if let Some(ex) = failed {
        ex.exit();
    }
}

pub(super) fn inspect(cmd: InspectSubcommand) {
    if !cmd.path.exists() {
        die!(EX_NOINPUT, "'{}' does not exist", cmd.path.display());
    }

    let store = PropertyStore::for_path(None, cmd.path);
    for info in or_die(store.inspect()) {
        let key = match info.key {
            Ok(key) => key.to_string(),
            Err(e) => format!("<{}>", e),
        };
        let format = match info.format {
            Ok(format) => format!("{:?}", format),
            Err(e) => format!("<{}>", e),
        };
        println!("{}\t{}\t{}\t{}", info.attribute, info.size, key, format);
    }
}

fn read_value(arg: &str) -> Element {
    let text = if "-" == arg {
        let mut buf = Vec::new();
        if let Err(e) = io::stdin().read_to_end(&mut buf) {
            die!(EX_NOINPUT, "Failed to read value from stdin: {}", e);
        }
        buf
    } else {
        arg.as_bytes().to_vec()
    };

    or_die(XmlSerializer.from_canonical_text(&text))
}
