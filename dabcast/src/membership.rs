//! Parsing of the membership file describing the static group.
//!
//! ```text
//! 3                   number of processes
//! 1 127.0.0.1 11001   <id> <host> <port>, one line per process, ids 1..=N in any order
//! 2 127.0.0.1 11002
//! 3 127.0.0.1 11003
//! 1 3                 optional: <id> <dependency>..., process 1 depends on process 3
//! ```
//!
//! Identifiers in the file are 1-indexed and converted to 0-indexed here. Dependency lines are
//! what selects the localized causal broadcast, without any of them the group uses FIFO
//! broadcast. Every process depends on itself, whether or not the file says so.
use crate::process::{ProcessDescriptor, ProcessId};
use crate::Error;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

/// Which ordering layer sits on top of the uniform reliable broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Fifo,
    Lcb,
}

/// The static group, ordered by process identifier.
#[derive(Debug, Clone)]
pub struct Membership {
    processes: Vec<ProcessDescriptor>,
    local: ProcessId,
    mode: Mode,
}

fn malformed(line: usize, message: impl AsRef<str>) -> Error {
    Error::Membership(format!("line {}: {}", line, message.as_ref()))
}

fn parse_id(token: &str, size: usize, line: usize) -> crate::Result<ProcessId> {
    let id: usize = token
        .parse()
        .map_err(|_| malformed(line, format!("invalid process id '{}'", token)))?;
    if id == 0 || id > size {
        return Err(malformed(
            line,
            format!("process id {} out of range 1..={}", id, size),
        ));
    }
    Ok((id - 1) as ProcessId)
}

fn resolve(host: &str, port: &str, line: usize) -> crate::Result<SocketAddr> {
    let port: u16 = port
        .parse()
        .map_err(|_| malformed(line, format!("invalid port '{}'", port)))?;
    (host, port)
        .to_socket_addrs()
        .map_err(|e| malformed(line, format!("unable to resolve '{}': {}", host, e)))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| malformed(line, format!("no IPv4 address for '{}'", host)))
}

impl Membership {
    /// Parse the membership content.
    ///
    /// `local` is the 0-indexed identifier of the process running the stack, `message_count` is
    /// stamped on every descriptor.
    ///
    /// # Errors
    ///
    /// Every problem is reported with the line where it happened: a missing or invalid size, a
    /// process line that does not have exactly three tokens, an identifier out of range or
    /// repeated, a missing process, and an unknown local process.
    pub fn parse(content: &str, local: ProcessId, message_count: i32) -> crate::Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(n, line)| (n + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let (n, header) = lines
            .next()
            .ok_or_else(|| malformed(1, "missing number of processes"))?;
        let size: usize = header
            .parse()
            .map_err(|_| malformed(n, format!("invalid number of processes '{}'", header)))?;
        if size == 0 || size > usize::from(ProcessId::MAX) {
            return Err(malformed(n, format!("number of processes {} out of range", size)));
        }

        let mut addresses: Vec<Option<SocketAddr>> = vec![None; size];
        for _ in 0..size {
            let (n, line) = lines
                .next()
                .ok_or_else(|| malformed(n, format!("expected {} processes", size)))?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let &[id, host, port] = tokens.as_slice() else {
                return Err(malformed(n, "expected '<id> <host> <port>'"));
            };

            let id = parse_id(id, size, n)?;
            if addresses[id as usize].is_some() {
                return Err(malformed(n, format!("process {} declared twice", id + 1)));
            }
            addresses[id as usize] = Some(resolve(host, port, n)?);
        }

        let mut dependencies: Vec<Vec<ProcessId>> =
            (0..size).map(|id| vec![id as ProcessId]).collect();
        let mut mode = Mode::Fifo;
        for (n, line) in lines {
            let mut tokens = line.split_whitespace();
            let owner = match tokens.next() {
                Some(token) => parse_id(token, size, n)?,
                None => continue,
            };
            for token in tokens {
                dependencies[owner as usize].push(parse_id(token, size, n)?);
            }
            mode = Mode::Lcb;
        }

        if usize::from(local) >= size {
            return Err(Error::Membership(format!(
                "local process {} is not a member",
                u32::from(local) + 1
            )));
        }

        let processes = addresses
            .into_iter()
            .zip(dependencies)
            .enumerate()
            .map(|(id, (address, dependencies))| {
                let id = id as ProcessId;
                let address = address.ok_or_else(|| {
                    Error::Membership(format!("process {} is not declared", id + 1))
                })?;
                Ok(ProcessDescriptor::new(
                    id,
                    address,
                    message_count,
                    dependencies,
                    id == local,
                ))
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(Membership {
            processes,
            local,
            mode,
        })
    }

    /// Read and parse the membership file.
    pub fn from_file(
        path: impl AsRef<Path>,
        local: ProcessId,
        message_count: i32,
    ) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Membership::parse(&content, local, message_count)
    }

    /// Build the membership straight from descriptors.
    ///
    /// The descriptors must be ordered by identifier, starting at 0, with exactly one local. As
    /// with a parsed file, every process is made to depend on itself.
    ///
    /// # Errors
    ///
    /// Fails on an empty group, a descriptor out of order, a dependency outside of the group, and
    /// anything other than exactly one local process.
    pub fn from_descriptors(processes: Vec<ProcessDescriptor>, mode: Mode) -> crate::Result<Self> {
        let size = processes.len();
        if size == 0 || size > usize::from(ProcessId::MAX) {
            return Err(Error::Membership(format!(
                "number of processes {} out of range",
                size
            )));
        }

        for (index, process) in processes.iter().enumerate() {
            if usize::from(process.id()) != index {
                return Err(Error::Membership(format!(
                    "descriptor at position {} has id {}",
                    index,
                    u32::from(process.id()) + 1
                )));
            }
            if let Some(&unknown) = process
                .dependencies()
                .iter()
                .find(|&&dependency| usize::from(dependency) >= size)
            {
                return Err(Error::Membership(format!(
                    "process {} depends on unknown process {}",
                    u32::from(process.id()) + 1,
                    u32::from(unknown) + 1
                )));
            }
        }

        let mut locals = processes.iter().filter(|p| p.is_local());
        let local = match (locals.next(), locals.next()) {
            (Some(process), None) => process.id(),
            _ => {
                return Err(Error::Membership(String::from(
                    "exactly one local process is required",
                )))
            }
        };

        let processes = processes
            .into_iter()
            .map(|process| {
                ProcessDescriptor::new(
                    process.id(),
                    process.address(),
                    process.message_count(),
                    process
                        .dependencies()
                        .iter()
                        .copied()
                        .chain(std::iter::once(process.id())),
                    process.is_local(),
                )
            })
            .collect();

        Ok(Membership {
            processes,
            local,
            mode,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn processes(&self) -> &[ProcessDescriptor] {
        &self.processes
    }

    pub fn get(&self, id: ProcessId) -> Option<&ProcessDescriptor> {
        self.processes.get(usize::from(id))
    }

    pub fn local(&self) -> &ProcessDescriptor {
        &self.processes[usize::from(self.local)]
    }
}
