//! In-memory iproute2 stand-in shared by the integration tests.
//!
//! Keeps just enough kernel state (namespaces, host interfaces and their
//! admin state) to answer the queries the fabric makes, and fails the way
//! `ip` does when an object is missing.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use netfabric::network::link::classify_failure;
use netfabric::{Error, IpRunner, Links, Result};

#[derive(Debug, Default)]
struct KernelState {
    namespaces: BTreeSet<String>,
    /// Host-namespace interfaces and whether they are admin up.
    interfaces: BTreeMap<String, bool>,
    calls: Vec<Vec<String>>,
    fail_on: Option<String>,
}

/// Recording fake [`IpRunner`].
#[derive(Debug, Default)]
pub struct FakeIp {
    state: Mutex<KernelState>,
}

impl FakeIp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Builds a [`Links`] handle on top of `fake`.
    pub fn links(fake: &Arc<Self>) -> Links {
        Links::new(fake.clone())
    }

    /// Every invocation seen so far, one argv per call.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls whose argv starts with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                call.len() >= prefix.len()
                    && call.iter().zip(prefix).all(|(a, b)| a.as_str() == *b)
            })
            .count()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().unwrap().namespaces.iter().cloned().collect()
    }

    pub fn has_interface(&self, dev: &str) -> bool {
        self.state.lock().unwrap().interfaces.contains_key(dev)
    }

    pub fn is_interface_up(&self, dev: &str) -> Option<bool> {
        self.state.lock().unwrap().interfaces.get(dev).copied()
    }

    /// Pretends a previous run leaked `dev`.
    pub fn leak_interface(&self, dev: &str) {
        self.state.lock().unwrap().interfaces.insert(dev.to_string(), true);
    }

    /// Removes `ns` behind the fabric's back.
    pub fn vanish_namespace(&self, ns: &str) {
        self.state.lock().unwrap().namespaces.remove(ns);
    }

    /// Removes `dev` behind the fabric's back.
    pub fn vanish_interface(&self, dev: &str) {
        self.state.lock().unwrap().interfaces.remove(dev);
    }

    /// Any call whose joined argv contains `fragment` fails fatally.
    pub fn fail_on(&self, fragment: &str) {
        self.state.lock().unwrap().fail_on = Some(fragment.to_string());
    }

    /// Stops failing calls.
    pub fn clear_failure(&self) {
        self.state.lock().unwrap().fail_on = None;
    }
}

fn absent(object: &str, args: &[&str]) -> Error {
    classify_failure(object, args, &format!("Cannot find device \"{object}\""))
}

#[async_trait]
impl IpRunner for FakeIp {
    async fn ip(&self, object: &str, args: &[&str]) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(args.iter().map(|a| a.to_string()).collect());

        if let Some(fragment) = &state.fail_on {
            if args.join(" ").contains(fragment.as_str()) {
                return Err(classify_failure(
                    object,
                    args,
                    "RTNETLINK answers: Operation not permitted",
                ));
            }
        }

        // Operations inside a namespace only need the namespace to exist.
        if let ["-n", ns, rest @ ..] = args {
            if !state.namespaces.contains(*ns) {
                return Err(classify_failure(
                    object,
                    args,
                    &format!("Cannot open network namespace \"{ns}\": No such file or directory"),
                ));
            }
            return Ok(match rest {
                ["-o", "link", "show", "dev", dev] => {
                    format!("2: {dev}@if3: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500\n")
                }
                _ => String::new(),
            });
        }

        match args {
            ["netns", "add", ns] => {
                if !state.namespaces.insert(ns.to_string()) {
                    return Err(classify_failure(object, args, "File exists"));
                }
            }
            ["netns", "delete", ns] => {
                if !state.namespaces.remove(*ns) {
                    return Err(classify_failure(
                        object,
                        args,
                        &format!(
                            "Cannot remove namespace file \"/run/netns/{ns}\": \
                             No such file or directory"
                        ),
                    ));
                }
            }
            ["netns", "list"] => {
                return Ok(state
                    .namespaces
                    .iter()
                    .enumerate()
                    .map(|(id, ns)| format!("{ns} (id: {id})\n"))
                    .collect());
            }
            ["link", "add", "name", dev, "type", "bridge"] => {
                state.interfaces.insert(dev.to_string(), false);
            }
            ["link", "add", "name", _, "netns", ns, "type", "veth", "peer", "name", peer] => {
                if !state.namespaces.contains(*ns) {
                    return Err(absent(ns, args));
                }
                state.interfaces.insert(peer.to_string(), false);
            }
            ["link", "set", "dev", dev, "master", bridge] => {
                if !state.interfaces.contains_key(*dev) {
                    return Err(absent(dev, args));
                }
                if !state.interfaces.contains_key(*bridge) {
                    return Err(absent(bridge, args));
                }
            }
            ["link", "set", "dev", dev, updown] => match state.interfaces.get_mut(*dev) {
                Some(up) => *up = *updown == "up",
                None => return Err(absent(dev, args)),
            },
            ["link", "delete", "dev", dev] => {
                if state.interfaces.remove(*dev).is_none() {
                    return Err(absent(dev, args));
                }
            }
            ["-o", "link", "show", "dev", dev] => {
                return match state.interfaces.get(*dev) {
                    Some(true) => Ok(format!(
                        "5: {dev}@if2: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500\n"
                    )),
                    Some(false) => Ok(format!("5: {dev}@if2: <BROADCAST,MULTICAST> mtu 1500\n")),
                    None => Err(absent(dev, args)),
                };
            }
            ["addr", "add", _, "dev", dev] => {
                if !state.interfaces.contains_key(*dev) {
                    return Err(absent(dev, args));
                }
            }
            other => panic!("unexpected ip invocation: {other:?}"),
        }
        Ok(String::new())
    }
}

/// Writes a sysctl stand-in holding `1`.
pub fn fake_sysctl(dir: &Path) -> PathBuf {
    let path = dir.join("bridge-nf-call-iptables");
    std::fs::write(&path, "1\n").unwrap();
    path
}

/// Creates an executable stand-in for a cluster binary running `body`.
pub fn fake_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Creates an executable stand-in for a cluster binary that succeeds.
pub fn fake_program(dir: &Path, name: &str) -> PathBuf {
    fake_script(dir, name, "exit 0")
}
