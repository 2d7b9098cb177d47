//! The per-rank request endpoint and its maintenance phase.
//!
//! Wire layouts (little-endian):
//!
//! ```text
//! announcement batch: count u32, then per entry: kind u8 (0 = register,
//!                     1 = unregister) | name (u32 len + bytes)
//! request batch:      count u32, then per request: id u64 | target kind u8
//!                     (0 = object, 1 = field, 2 = entity) | name str,
//!                     field u32 or entity u64 | selector u32 |
//!                     arg (u32 len + bytes)
//! response batch:     count u32, then per response: id u64 | status u8
//!                     (0 = ok, 1 = error) | value bytes or error string
//! ```

use indexmap::IndexMap;
use tracing::debug;

use tessera_comm::Communicator;
use tessera_core::{ByteReader, ByteWriter, CodecError, EntityId, FieldId};

use crate::error::RemoteError;
use crate::promise::{Promise, PromiseId};

/// An object that answers requests addressed to its registered name.
pub trait RemoteObject: Send {
    /// Produce the encoded answer to `selector` applied to `arg`, or an
    /// error message that the requester will see as
    /// [`PromiseError::Remote`](crate::PromiseError::Remote).
    fn respond(&mut self, selector: u32, arg: &[u8]) -> Result<Vec<u8>, String>;
}

/// What the origin rank of an entity does with a request addressed to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Routed {
    /// Answer directly.
    Answer(Result<Vec<u8>, String>),
    /// Pass the request on to the rank currently holding the entity.
    Forward(u32),
}

/// Answers requests addressed to fields and entities rather than named
/// objects.
pub trait Responder {
    /// Produce the encoded answer for a request against `field`.
    fn respond_field(&mut self, field: FieldId, selector: u32, arg: &[u8])
        -> Result<Vec<u8>, String>;

    /// Handle a request for `entity` on the entity's origin rank: answer
    /// it, or name the rank that holds the entity now.
    fn route_entity(&mut self, entity: EntityId, _selector: u32, _arg: &[u8]) -> Routed {
        Routed::Answer(Err(format!("entity {entity} is not tracked here")))
    }

    /// Answer a request for `entity` forwarded by its origin rank.
    fn respond_entity(
        &mut self,
        entity: EntityId,
        _selector: u32,
        _arg: &[u8],
    ) -> Result<Vec<u8>, String> {
        Err(format!("entity {entity} is not held here"))
    }
}

/// A [`Responder`] for endpoints that serve no fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFields;

impl Responder for NoFields {
    fn respond_field(&mut self, field: FieldId, _: u32, _: &[u8]) -> Result<Vec<u8>, String> {
        Err(format!("field {field} is not served here"))
    }
}

/// Where a request goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// A named object, located through the process-wide directory.
    Object(String),
    /// A field on a specific rank.
    Field {
        /// The field.
        field: FieldId,
        /// The rank owning the queried cells.
        rank: u32,
    },
    /// An entity, wherever it lives. The request goes to the entity's
    /// origin rank, which answers it or forwards it once to the current
    /// holder within the same maintenance phase.
    Entity(EntityId),
}

#[derive(Clone, Debug)]
struct Request {
    id: PromiseId,
    target: Target,
    selector: u32,
    arg: Vec<u8>,
}

#[derive(Clone, Debug)]
enum Announcement {
    Register(String),
    Unregister(String),
}

/// Counters from one maintenance phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintainReport {
    /// Requests this rank sent.
    pub sent: usize,
    /// Requests this rank answered.
    pub served: usize,
    /// Promises this rank fulfilled.
    pub fulfilled: usize,
    /// Entity requests this rank passed on to the current holder.
    pub forwarded: usize,
}

/// One rank's view of the request/response mechanism.
pub struct RemoteEndpoint {
    rank: u32,
    objects: IndexMap<String, Box<dyn RemoteObject>>,
    directory: IndexMap<String, u32>,
    announcements: Vec<Announcement>,
    outbound: Vec<Request>,
    waiting: IndexMap<PromiseId, Promise>,
    next_seq: u32,
}

impl RemoteEndpoint {
    /// Create the endpoint for `rank`.
    pub fn new(rank: u32) -> Self {
        Self {
            rank,
            objects: IndexMap::new(),
            directory: IndexMap::new(),
            announcements: Vec::new(),
            outbound: Vec::new(),
            waiting: IndexMap::new(),
            next_seq: 0,
        }
    }

    /// Register a named object on this rank. Other ranks can address it
    /// after the next maintenance phase.
    pub fn register(&mut self, name: impl Into<String>, object: Box<dyn RemoteObject>) {
        let name = name.into();
        self.announcements
            .push(Announcement::Register(name.clone()));
        self.objects.insert(name, object);
    }

    /// Remove a named object from this rank, returning it. The directory
    /// forgets it at the next maintenance phase.
    pub fn unregister(&mut self, name: &str) -> Option<Box<dyn RemoteObject>> {
        let object = self.objects.shift_remove(name)?;
        self.announcements
            .push(Announcement::Unregister(name.to_string()));
        Some(object)
    }

    /// Rank currently registered for `name`, as of the last maintenance
    /// phase.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.directory.get(name).copied()
    }

    /// Queue a request and return its unresolved promise.
    pub fn request(&mut self, target: Target, selector: u32, arg: Vec<u8>) -> Promise {
        let id = PromiseId::new(self.rank, self.next_seq);
        self.next_seq = self.next_seq.wrapping_add(1);
        let promise = Promise::new(id);
        self.waiting.insert(id, promise.clone());
        self.outbound.push(Request {
            id,
            target,
            selector,
            arg,
        });
        promise
    }

    /// Requests queued since the last maintenance phase.
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Promises still waiting for an answer.
    pub fn outstanding(&self) -> usize {
        self.waiting.len()
    }

    /// The collective maintenance phase. Every rank calls it once per
    /// tick.
    ///
    /// 1. Publish directory changes to every rank.
    /// 2. Ship every queued request to the rank that serves it.
    /// 3. Dispatch received requests to objects or to `responder`.
    ///    Entity requests the origin rank forwards travel in a second
    ///    exchange and are answered by the holder.
    /// 4. Ship the answers back.
    /// 5. Fulfil the matching promises.
    pub fn maintain(
        &mut self,
        comm: &mut dyn Communicator,
        responder: &mut dyn Responder,
    ) -> Result<MaintainReport, RemoteError> {
        let mut report = MaintainReport::default();
        self.publish_directory(comm)?;

        // 2. Route requests. Unknown names are answered locally with an
        //    error, still at this phase.
        let size = comm.size() as usize;
        let all: Vec<u32> = (0..comm.size()).collect();
        let mut buckets: Vec<Vec<Request>> = vec![Vec::new(); size];
        for req in std::mem::take(&mut self.outbound) {
            let dest = match &req.target {
                Target::Object(name) => self.directory.get(name).copied(),
                Target::Field { rank, .. } => Some(*rank).filter(|r| (*r as usize) < size),
                Target::Entity(entity) => Some(entity.origin()).filter(|r| (*r as usize) < size),
            };
            match dest {
                Some(rank) => buckets[rank as usize].push(req),
                None => {
                    if let Some(promise) = self.waiting.shift_remove(&req.id) {
                        promise.fulfil(Err(format!("no endpoint for {:?}", req.target)))?;
                        report.fulfilled += 1;
                    }
                }
            }
        }
        report.sent = buckets.iter().map(Vec::len).sum();
        let sends = buckets.iter().map(|b| encode_requests(b)).collect();
        let received = comm.group_exchange(&all, sends)?;

        // 3. Dispatch, in source-rank order.
        let mut answers: Vec<ByteWriter> = vec![ByteWriter::new(); size];
        let mut counts = vec![0u32; size];
        let mut bodies: Vec<ByteWriter> = vec![ByteWriter::new(); size];
        let mut forwards: Vec<Vec<Request>> = vec![Vec::new(); size];
        for buf in &received {
            for req in decode_requests(buf)? {
                let result = match &req.target {
                    Target::Object(name) => match self.objects.get_mut(name) {
                        Some(obj) => obj.respond(req.selector, &req.arg),
                        None => Err(format!("'{name}' is not registered on rank {}", self.rank)),
                    },
                    Target::Field { field, .. } => {
                        responder.respond_field(*field, req.selector, &req.arg)
                    }
                    Target::Entity(entity) => {
                        let entity = *entity;
                        match responder.route_entity(entity, req.selector, &req.arg) {
                            Routed::Answer(result) => result,
                            Routed::Forward(holder) if holder == self.rank => {
                                responder.respond_entity(entity, req.selector, &req.arg)
                            }
                            Routed::Forward(holder) if (holder as usize) < size => {
                                forwards[holder as usize].push(req);
                                report.forwarded += 1;
                                continue;
                            }
                            Routed::Forward(holder) => {
                                Err(format!("entity {entity} forwarded to unknown rank {holder}"))
                            }
                        }
                    }
                };
                let origin = req.id.origin() as usize;
                if origin >= size {
                    return Err(RemoteError::UnknownPromise { id: req.id });
                }
                encode_response(&mut bodies[origin], req.id, &result);
                counts[origin] += 1;
                report.served += 1;
            }
        }

        // 3b. Forwarded entity requests. The holder answers the requester
        //     directly; nothing is forwarded twice.
        let sends = forwards.iter().map(|b| encode_requests(b)).collect();
        let received = comm.group_exchange(&all, sends)?;
        for buf in &received {
            for req in decode_requests(buf)? {
                let result = match &req.target {
                    Target::Entity(entity) => {
                        responder.respond_entity(*entity, req.selector, &req.arg)
                    }
                    other => Err(format!("{other:?} cannot be forwarded")),
                };
                let origin = req.id.origin() as usize;
                if origin >= size {
                    return Err(RemoteError::UnknownPromise { id: req.id });
                }
                encode_response(&mut bodies[origin], req.id, &result);
                counts[origin] += 1;
                report.served += 1;
            }
        }
        for ((answer, body), count) in answers.iter_mut().zip(bodies).zip(counts) {
            answer.write_u32_le(count);
            answer.write_raw(&body.into_bytes());
        }

        // 4-5. Return answers and fulfil.
        let sends = answers.into_iter().map(ByteWriter::into_bytes).collect();
        let responses = comm.group_exchange(&all, sends)?;
        for buf in &responses {
            let mut r = ByteReader::new(buf);
            let count = r.read_u32_le()?;
            for _ in 0..count {
                let (id, result) = decode_response(&mut r)?;
                let promise = self
                    .waiting
                    .shift_remove(&id)
                    .ok_or(RemoteError::UnknownPromise { id })?;
                promise.fulfil(result)?;
                report.fulfilled += 1;
            }
            r.finish()?;
        }
        debug!(
            rank = self.rank,
            sent = report.sent,
            served = report.served,
            fulfilled = report.fulfilled,
            forwarded = report.forwarded,
            "remote maintenance complete"
        );
        Ok(report)
    }

    fn publish_directory(&mut self, comm: &mut dyn Communicator) -> Result<(), RemoteError> {
        let mut w = ByteWriter::new();
        w.write_u32_le(self.announcements.len() as u32);
        for a in self.announcements.drain(..) {
            let (kind, name) = match a {
                Announcement::Register(n) => (0u8, n),
                Announcement::Unregister(n) => (1u8, n),
            };
            w.write_u8(kind);
            w.write_length_prefixed_str(&name);
        }
        let gathered = comm.all_gather(w.into_bytes())?;
        for (rank, buf) in gathered.iter().enumerate() {
            let rank = rank as u32;
            let mut r = ByteReader::new(buf);
            let count = r.read_u32_le()?;
            for _ in 0..count {
                let kind = r.read_u8()?;
                let name = r.read_length_prefixed_str()?;
                match kind {
                    0 => {
                        if let Some(&first) = self.directory.get(&name) {
                            if first != rank {
                                return Err(RemoteError::DuplicateName {
                                    name,
                                    first,
                                    second: rank,
                                });
                            }
                        }
                        self.directory.insert(name, rank);
                    }
                    1 => {
                        if self.directory.get(&name) == Some(&rank) {
                            self.directory.shift_remove(&name);
                        }
                    }
                    other => {
                        return Err(CodecError::InvalidTag {
                            what: "announcement",
                            value: u32::from(other),
                        }
                        .into())
                    }
                }
            }
            r.finish()?;
        }
        Ok(())
    }
}

fn encode_requests(reqs: &[Request]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_u32_le(reqs.len() as u32);
    for req in reqs {
        w.write_u64_le(req.id.0);
        match &req.target {
            Target::Object(name) => {
                w.write_u8(0);
                w.write_length_prefixed_str(name);
            }
            Target::Field { field, .. } => {
                w.write_u8(1);
                w.write_u32_le(field.0);
            }
            Target::Entity(entity) => {
                w.write_u8(2);
                w.write_u64_le(entity.raw());
            }
        }
        w.write_u32_le(req.selector);
        w.write_length_prefixed_bytes(&req.arg);
    }
    w.into_bytes()
}

fn decode_requests(buf: &[u8]) -> Result<Vec<Request>, CodecError> {
    let mut r = ByteReader::new(buf);
    let count = r.read_u32_le()?;
    let mut out = Vec::new();
    for _ in 0..count {
        let id = PromiseId(r.read_u64_le()?);
        let target = match r.read_u8()? {
            0 => Target::Object(r.read_length_prefixed_str()?),
            1 => Target::Field {
                field: FieldId(r.read_u32_le()?),
                rank: 0,
            },
            2 => Target::Entity(EntityId::from_raw(r.read_u64_le()?)),
            other => {
                return Err(CodecError::InvalidTag {
                    what: "request target",
                    value: u32::from(other),
                })
            }
        };
        let selector = r.read_u32_le()?;
        let arg = r.read_length_prefixed_bytes()?.to_vec();
        out.push(Request {
            id,
            target,
            selector,
            arg,
        });
    }
    r.finish()?;
    Ok(out)
}

fn encode_response(w: &mut ByteWriter, id: PromiseId, result: &Result<Vec<u8>, String>) {
    w.write_u64_le(id.0);
    match result {
        Ok(bytes) => {
            w.write_u8(0);
            w.write_length_prefixed_bytes(bytes);
        }
        Err(reason) => {
            w.write_u8(1);
            w.write_length_prefixed_str(reason);
        }
    }
}

fn decode_response(
    r: &mut ByteReader<'_>,
) -> Result<(PromiseId, Result<Vec<u8>, String>), CodecError> {
    let id = PromiseId(r.read_u64_le()?);
    let result = match r.read_u8()? {
        0 => Ok(r.read_length_prefixed_bytes()?.to_vec()),
        1 => Err(r.read_length_prefixed_str()?),
        other => {
            return Err(CodecError::InvalidTag {
                what: "response status",
                value: u32::from(other),
            })
        }
    };
    Ok((id, result))
}
