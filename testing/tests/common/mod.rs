//! Shared domain for the integration tests: a user aggregate and two
//! projections over its events.

#![allow(dead_code)] // Not every test file uses every item

use eventum_core::aggregate::Aggregate;
use eventum_core::event::{Event, EventRecord};
use eventum_core::handler::Handlers;
use eventum_core::projection::Projection;
use eventum_core::snapshot::{SnapshotError, SnapshotMemento};
use eventum_core::stream::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRegistered {
    pub name: String,
    pub age: u32,
}

impl Event for UserRegistered {
    const EVENT_TYPE: &'static str = "UserRegistered.v1";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRenamed {
    pub name: String,
}

impl Event for UserRenamed {
    const EVENT_TYPE: &'static str = "UserRenamed.v1";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserDeleted;

impl Event for UserDeleted {
    const EVENT_TYPE: &'static str = "UserDeleted.v1";
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    pub name: String,
    pub age: u32,
}

impl Aggregate for User {
    const SNAPSHOTABLE: bool = true;

    fn handlers() -> &'static Handlers<Self> {
        static HANDLERS: OnceLock<Handlers<User>> = OnceLock::new();
        HANDLERS.get_or_init(|| {
            Handlers::new()
                .on(|user: &mut User, e: &UserRegistered| {
                    user.name.clone_from(&e.name);
                    user.age = e.age;
                })
                .try_on(|user: &mut User, e: &UserRenamed| {
                    if e.name.is_empty() {
                        return Err("a user needs a name".into());
                    }
                    user.name.clone_from(&e.name);
                    Ok(())
                })
        })
    }

    fn capture(&self, memento: &mut SnapshotMemento) -> Result<(), SnapshotError> {
        memento.insert("name", &self.name)?;
        memento.insert("age", &self.age)
    }

    fn restore(&mut self, memento: &SnapshotMemento) {
        memento.restore("name", &mut self.name);
        memento.restore("age", &mut self.age);
    }
}

/// Same events, but never snapshotted.
#[derive(Debug, Default)]
pub struct PlainUser {
    pub name: String,
}

impl Aggregate for PlainUser {
    fn handlers() -> &'static Handlers<Self> {
        static HANDLERS: OnceLock<Handlers<PlainUser>> = OnceLock::new();
        HANDLERS.get_or_init(|| {
            Handlers::new()
                .on(|user: &mut PlainUser, e: &UserRegistered| user.name.clone_from(&e.name))
                .on(|user: &mut PlainUser, e: &UserRenamed| user.name.clone_from(&e.name))
        })
    }
}

/// One view per user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub age: u32,
}

pub struct UserProfileProjection;

impl Projection for UserProfileProjection {
    const NAME: &'static str = "user-profile";
    type View = UserProfile;

    fn handlers() -> &'static Handlers<UserProfile> {
        static HANDLERS: OnceLock<Handlers<UserProfile>> = OnceLock::new();
        HANDLERS.get_or_init(|| {
            Handlers::new()
                .on(|view: &mut UserProfile, e: &UserRegistered| {
                    view.name.clone_from(&e.name);
                    view.age = e.age;
                })
                .on(|view: &mut UserProfile, e: &UserRenamed| view.name.clone_from(&e.name))
        })
    }

    fn view_name(record: &EventRecord) -> String {
        format!("UserProfile-{}", record.stream_id())
    }
}

/// One shared view of every user's name, under the default view name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDirectory {
    pub names: BTreeMap<String, String>,
}

pub struct UserDirectoryProjection;

impl Projection for UserDirectoryProjection {
    const NAME: &'static str = "user-directory";
    type View = UserDirectory;

    fn handlers() -> &'static Handlers<UserDirectory> {
        static HANDLERS: OnceLock<Handlers<UserDirectory>> = OnceLock::new();
        HANDLERS.get_or_init(|| {
            Handlers::new().try_on(|view: &mut UserDirectory, e: &UserRegistered| {
                if e.name.is_empty() {
                    return Err("directory entries need a name".into());
                }
                view.names.insert(e.name.to_lowercase(), e.name.clone());
                Ok(())
            })
        })
    }
}

pub fn registered(stream: &str, name: &str, age: u32) -> EventRecord {
    EventRecord::new(
        stream,
        UserRegistered {
            name: name.into(),
            age,
        },
    )
}

pub fn renamed(stream: &str, name: &str) -> EventRecord {
    EventRecord::new(stream, UserRenamed { name: name.into() })
}

pub fn at(record: EventRecord, version: u64) -> EventRecord {
    record.with_version(Version::new(version))
}
