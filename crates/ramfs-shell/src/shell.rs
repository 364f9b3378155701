// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Command execution against a single attached filesystem

use std::io::{BufRead, Write};

use anyhow::{anyhow, bail, Context, Result};
use ramfs_core::{
    Dir, Fid, FaultPolicy, FsError, OpenMode, RamFs, RemoveOutcome, BLOCK_SIZE, DMDIR,
};
use tracing::{debug, warn};

use crate::command::{parse_line, Command};

/// Whether the read loop should keep going
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell {
    fs: RamFs,
    root: Fid,
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

fn mode_string(mode: u32) -> String {
    let kind = if mode & DMDIR != 0 { 'd' } else { '-' };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 7;
        out.push(if bits & 4 != 0 { 'r' } else { '-' });
        out.push(if bits & 2 != 0 { 'w' } else { '-' });
        out.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    out
}

fn entry_line(dir: &Dir) -> String {
    format!(
        "{} {:>8} {:>10} {}",
        mode_string(dir.mode),
        dir.uid,
        dir.length,
        dir.name
    )
}

impl Shell {
    pub fn new(fs: RamFs, spec: &str) -> Result<Self> {
        let root = fs.attach(spec).context("attaching to filesystem root")?;
        Ok(Self { fs, root })
    }

    pub fn fs(&self) -> &RamFs {
        &self.fs
    }

    /// Execute every line of `input`, reporting failures on `out` and carrying
    /// on. Returns the number of failed lines.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> Result<usize> {
        let mut failures = 0;
        for (number, line) in input.lines().enumerate() {
            let line = line.context("reading command input")?;
            let Some(parsed) = parse_line(&line) else {
                continue;
            };
            let command = match parsed {
                Ok(command) => command,
                Err(err) => {
                    if err.use_stderr() {
                        failures += 1;
                    }
                    write!(out, "{}", err.render())?;
                    continue;
                }
            };
            match self.execute(command, out) {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(err) => {
                    failures += 1;
                    warn!(line = number + 1, error = %err, "command failed");
                    writeln!(out, "error: {err:#}")?;
                }
            }
        }
        Ok(failures)
    }

    pub fn execute<W: Write>(&mut self, command: Command, out: &mut W) -> Result<Flow> {
        debug!(?command, "execute");
        match command {
            Command::Ls { path } => self.ls(path.as_deref().unwrap_or("/"), out)?,
            Command::Mkdir { path, mode } => {
                let fid = self.create(&path, OpenMode::read(), DMDIR | (mode & 0o777))?;
                self.fs.close(fid)?;
            }
            Command::Touch { path, mode } => {
                let fid = match self.lookup(&path)? {
                    Some(fid) => fid,
                    None => self.create(&path, OpenMode::read(), mode & 0o777)?,
                };
                self.fs.close(fid)?;
            }
            Command::Write { path, text } => {
                let n = self.write_text(&path, &text.join(" "), false)?;
                writeln!(out, "{n} bytes")?;
            }
            Command::Append { path, text } => {
                let n = self.write_text(&path, &text.join(" "), true)?;
                writeln!(out, "{n} bytes")?;
            }
            Command::Cat { path } => {
                let data = self.read_file(&path)?;
                out.write_all(&data)?;
                if !data.ends_with(b"\n") {
                    writeln!(out)?;
                }
            }
            Command::Stat { path } => {
                let fid = self.resolve(&path)?;
                let result = self.fs.stat_dir(fid);
                self.fs.close(fid)?;
                let dir = result?;
                writeln!(out, "name    {}", dir.name)?;
                writeln!(out, "qid     {:#x} v{} {:?}", dir.qid.path, dir.qid.version, dir.qid.kind)?;
                writeln!(out, "mode    {} ({:o})", mode_string(dir.mode), dir.mode)?;
                writeln!(out, "length  {}", dir.length)?;
                writeln!(out, "owner   {} {} {}", dir.uid, dir.gid, dir.muid)?;
            }
            Command::Mv { path, name } => {
                let mut change = Dir::null();
                change.name = name;
                self.wstat(&path, &change)?;
            }
            Command::Chmod { mode, path } => {
                let fid = self.resolve(&path)?;
                let current = self.fs.stat_dir(fid);
                let result = current.and_then(|dir| {
                    let mut change = Dir::null();
                    change.mode = (dir.mode & DMDIR) | (mode & 0o777);
                    self.fs.wstat(fid, &change.encode()?)
                });
                self.fs.close(fid)?;
                result?;
            }
            Command::Rm { path } => {
                let fid = self.resolve(&path)?;
                if self.fs.remove(fid)? == RemoveOutcome::Deferred {
                    writeln!(out, "{path}: removal deferred until last close")?;
                }
            }
            Command::Tree => write!(out, "{}", self.fs.dump_tree())?,
            Command::Stats => {
                let stats = self.fs.stats();
                writeln!(out, "nodes           {}", stats.nodes)?;
                writeln!(out, "pending delete  {}", stats.pending_delete)?;
                writeln!(out, "handles         {}", stats.handles)?;
                writeln!(out, "open            {}", stats.open_files)?;
                writeln!(out, "blocks          {}", stats.blocks)?;
                writeln!(out, "bytes in memory {}", stats.bytes_in_memory)?;
            }
            Command::FaultPolicySet { file } => {
                let bytes = std::fs::read(&file)
                    .with_context(|| format!("reading fault policy {}", file.display()))?;
                let policy = FaultPolicy::from_json_bytes(&bytes)
                    .with_context(|| format!("parsing fault policy {}", file.display()))?;
                writeln!(out, "fault policy: {} rule(s)", policy.rules.len())?;
                self.fs.set_fault_policy(policy);
            }
            Command::FaultPolicyClear => self.fs.clear_fault_policy(),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Walk a slash-separated path from the root; a handle only when every
    /// component resolved.
    fn lookup(&self, path: &str) -> Result<Option<Fid>> {
        let names = split_path(path);
        match self.fs.walk(self.root, &names) {
            Ok(walk) => Ok(walk.fid),
            Err(FsError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn resolve(&self, path: &str) -> Result<Fid> {
        self.lookup(path)?
            .ok_or_else(|| anyhow!("{path}: no such file or directory"))
    }

    /// Create the last component of `path` inside its parent directory
    fn create(&self, path: &str, mode: OpenMode, perm: u32) -> Result<Fid> {
        let mut names = split_path(path);
        let name = names.pop().ok_or_else(|| anyhow!("{path}: missing name"))?;
        let parent = self
            .fs
            .walk(self.root, &names)?
            .fid
            .ok_or_else(|| anyhow!("{path}: parent directory does not exist"))?;
        if let Err(err) = self.fs.create(parent, name, mode, perm) {
            self.fs.close(parent)?;
            return Err(err).with_context(|| format!("creating {path}"));
        }
        Ok(parent)
    }

    fn write_text(&self, path: &str, text: &str, append: bool) -> Result<usize> {
        let mut data = text.as_bytes().to_vec();
        data.push(b'\n');
        let fid = match self.lookup(path)? {
            Some(fid) => {
                if let Err(err) = self.fs.open(fid, OpenMode::write()) {
                    self.fs.close(fid)?;
                    return Err(err).with_context(|| format!("opening {path}"));
                }
                fid
            }
            None => self.create(path, OpenMode::write(), 0o644)?,
        };
        let offset = if append {
            self.fs.stat_dir(fid).map(|dir| dir.length)
        } else {
            Ok(0)
        };
        let result = offset.and_then(|offset| self.fs.write(fid, offset, &data));
        self.fs.close(fid)?;
        let written = result?;
        if written < data.len() {
            bail!("{path}: short write ({written} of {} bytes)", data.len());
        }
        Ok(written)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let fid = self.resolve(path)?;
        let opened = self.fs.stat_dir(fid).and_then(|dir| {
            if dir.is_dir() {
                return Err(FsError::IsADirectory);
            }
            self.fs.open(fid, OpenMode::read())
        });
        if let Err(err) = opened {
            self.fs.close(fid)?;
            return Err(err).with_context(|| format!("opening {path}"));
        }
        let mut data = Vec::new();
        let mut chunk = vec![0u8; BLOCK_SIZE];
        let result = loop {
            match self.fs.read(fid, data.len() as u64, &mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => data.extend_from_slice(&chunk[..n]),
                Err(err) => break Err(err),
            }
        };
        self.fs.close(fid)?;
        result?;
        Ok(data)
    }

    fn ls<W: Write>(&self, path: &str, out: &mut W) -> Result<()> {
        let fid = self.resolve(path)?;
        let result = self.list(fid, out);
        self.fs.close(fid)?;
        result
    }

    fn list<W: Write>(&self, fid: Fid, out: &mut W) -> Result<()> {
        let dir = self.fs.stat_dir(fid)?;
        if !dir.is_dir() {
            writeln!(out, "{}", entry_line(&dir))?;
            return Ok(());
        }
        self.fs.open(fid, OpenMode::read())?;
        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut offset = 0u64;
        loop {
            let n = self.fs.read(fid, offset, &mut buf)?;
            if n == 0 {
                break;
            }
            offset += n as u64;
            let mut rest = &buf[..n];
            while !rest.is_empty() {
                let (entry, used) = Dir::decode(rest)?;
                writeln!(out, "{}", entry_line(&entry))?;
                rest = &rest[used..];
            }
        }
        Ok(())
    }

    fn wstat(&self, path: &str, change: &Dir) -> Result<()> {
        let fid = self.resolve(path)?;
        let result = change.encode().and_then(|bytes| self.fs.wstat(fid, &bytes));
        self.fs.close(fid)?;
        result.with_context(|| format!("updating {path}"))?;
        Ok(())
    }
}
