//! `local` store — in-process state with an optional JSON snapshot directory.
//!
//! All records live behind one mutex. When opened with a snapshot directory,
//! each curriculum is persisted together with its conversations as
//! `curricula/{id}.json`, and learner profiles as `profiles.json`. A write
//! only rewrites the file of the curriculum it touched, through `{file}.tmp`
//! and a rename; if that fails the in-memory change is rolled back.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TutorError;
use crate::model::{
    Conversation, ConversationTurn, Curriculum, CurriculumUnit, FollowUpSet, LearnerProfile, NewTurn,
};

use super::ContextStore;

const CURRICULA_DIR: &str = "curricula";
const PROFILES_FILE: &str = "profiles.json";

#[derive(Debug, Default)]
struct StoreState {
    curricula: HashMap<String, Curriculum>,
    conversations: HashMap<String, Conversation>,
    profiles: HashMap<String, LearnerProfile>,
}

/// On-disk shape of one curriculum file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurriculumRecord {
    curriculum: Curriculum,
    #[serde(default)]
    conversations: Vec<Conversation>,
}

/// The part of the state a write touches.
enum Shard {
    Curriculum(String),
    Profiles,
}

impl StoreState {
    fn conversation(&self, id: &str) -> Result<&Conversation, TutorError> {
        self.conversations
            .get(id)
            .ok_or_else(|| TutorError::not_found("conversation", id))
    }

    fn conversation_mut(&mut self, id: &str) -> Result<&mut Conversation, TutorError> {
        self.conversations
            .get_mut(id)
            .ok_or_else(|| TutorError::not_found("conversation", id))
    }

    fn conversation_shard(&self, conversation_id: &str) -> Result<Shard, TutorError> {
        Ok(Shard::Curriculum(self.conversation(conversation_id)?.curriculum_id.clone()))
    }

    fn unit_shard(&self, unit_id: &str) -> Result<Shard, TutorError> {
        self.curricula
            .values()
            .find(|c| c.units.iter().any(|u| u.id == unit_id))
            .map(|c| Shard::Curriculum(c.id.clone()))
            .ok_or_else(|| TutorError::not_found("unit", unit_id))
    }

    fn record(&self, curriculum_id: &str) -> Option<CurriculumRecord> {
        let curriculum = self.curricula.get(curriculum_id)?.clone();
        let conversations = self
            .conversations
            .values()
            .filter(|c| c.curriculum_id == curriculum_id)
            .cloned()
            .collect();
        Some(CurriculumRecord { curriculum, conversations })
    }

    /// Replace everything stored for `curriculum_id` with `record`.
    fn restore(&mut self, curriculum_id: &str, record: Option<CurriculumRecord>) {
        self.curricula.remove(curriculum_id);
        self.conversations.retain(|_, c| c.curriculum_id != curriculum_id);
        if let Some(record) = record {
            self.load(record);
        }
    }

    fn load(&mut self, record: CurriculumRecord) {
        for conversation in record.conversations {
            self.conversations.insert(conversation.id.clone(), conversation);
        }
        self.curricula.insert(record.curriculum.id.clone(), record.curriculum);
    }
}

pub struct LocalStore {
    state: Mutex<StoreState>,
    snapshot: Option<PathBuf>,
}

impl LocalStore {
    /// Purely in-memory store; everything is lost on exit.
    pub fn new() -> Self {
        Self { state: Mutex::new(StoreState::default()), snapshot: None }
    }

    /// Store backed by the snapshot directory `dir`, loading it when present.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TutorError> {
        let dir = dir.into();
        let curricula_dir = dir.join(CURRICULA_DIR);
        fs::create_dir_all(&curricula_dir)
            .map_err(|e| TutorError::Store(format!("cannot create {}: {e}", curricula_dir.display())))?;

        let mut state = StoreState::default();
        let entries = fs::read_dir(&curricula_dir)
            .map_err(|e| TutorError::Store(format!("cannot read {}: {e}", curricula_dir.display())))?;
        for entry in entries {
            let path = entry
                .map_err(|e| TutorError::Store(format!("cannot read {}: {e}", curricula_dir.display())))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            state.load(read_json::<CurriculumRecord>(&path)?);
        }

        let profiles = dir.join(PROFILES_FILE);
        if profiles.exists() {
            state.profiles = read_json(&profiles)?;
        }

        info!(
            path = %dir.display(),
            curricula = state.curricula.len(),
            conversations = state.conversations.len(),
            "store snapshot loaded"
        );
        Ok(Self { state: Mutex::new(state), snapshot: Some(dir) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, TutorError> {
        self.state
            .lock()
            .map_err(|_| TutorError::Store("local store lock poisoned".into()))
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> Result<T, TutorError>) -> Result<T, TutorError> {
        let state = self.lock()?;
        f(&state)
    }

    /// Apply `f`, then persist the shard named by `shard`. The shard is
    /// resolved before `f` runs; any failure restores it in memory.
    fn write<T>(
        &self,
        shard: impl FnOnce(&StoreState) -> Result<Shard, TutorError>,
        f: impl FnOnce(&mut StoreState) -> Result<T, TutorError>,
    ) -> Result<T, TutorError> {
        let mut state = self.lock()?;
        let Some(dir) = &self.snapshot else {
            return f(&mut state);
        };

        match shard(&state)? {
            Shard::Curriculum(id) => {
                let before = state.record(&id);
                let out = f(&mut state).and_then(|out| {
                    write_record(dir, &id, state.record(&id).as_ref())?;
                    Ok(out)
                });
                if out.is_err() {
                    state.restore(&id, before);
                }
                out
            }
            Shard::Profiles => {
                let before = state.profiles.clone();
                let out = f(&mut state).and_then(|out| {
                    write_json(&dir.join(PROFILES_FILE), &state.profiles)?;
                    Ok(out)
                });
                if out.is_err() {
                    state.profiles = before;
                }
                out
            }
        }
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, TutorError> {
    let data = fs::read_to_string(path)
        .map_err(|e| TutorError::Store(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&data).map_err(|e| TutorError::Store(format!("malformed {}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TutorError> {
    let data = serde_json::to_string(value)
        .map_err(|e| TutorError::Store(format!("serialise {}: {e}", path.display())))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)
        .map_err(|e| TutorError::Store(format!("cannot write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| TutorError::Store(format!("cannot replace {}: {e}", path.display())))
}

/// Write or, for `None`, remove the file of one curriculum.
fn write_record(dir: &Path, curriculum_id: &str, record: Option<&CurriculumRecord>) -> Result<(), TutorError> {
    let path = dir.join(CURRICULA_DIR).join(format!("{curriculum_id}.json"));
    match record {
        Some(record) => write_json(&path, record),
        None => match fs::remove_file(&path) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                Err(TutorError::Store(format!("cannot remove {}: {e}", path.display())))
            }
            _ => Ok(()),
        },
    }
}

impl ContextStore for LocalStore {
    fn store_type(&self) -> &str {
        "local"
    }

    fn insert_curriculum(&self, curriculum: &Curriculum) -> Result<(), TutorError> {
        self.write(
            |_| Ok(Shard::Curriculum(curriculum.id.clone())),
            |state| {
                if state.curricula.contains_key(&curriculum.id) {
                    return Err(TutorError::Store(format!("curriculum {} already exists", curriculum.id)));
                }
                for unit in &curriculum.units {
                    state.conversations.insert(
                        unit.conversation_id.clone(),
                        Conversation {
                            id: unit.conversation_id.clone(),
                            curriculum_id: curriculum.id.clone(),
                            unit_id: unit.id.clone(),
                            turns: Vec::new(),
                            follow_ups: None,
                        },
                    );
                }
                state.curricula.insert(curriculum.id.clone(), curriculum.clone());
                debug!(curriculum_id = %curriculum.id, units = curriculum.units.len(), "curriculum stored");
                Ok(())
            },
        )
    }

    fn curriculum(&self, curriculum_id: &str) -> Result<Curriculum, TutorError> {
        self.read(|state| {
            state
                .curricula
                .get(curriculum_id)
                .cloned()
                .ok_or_else(|| TutorError::not_found("curriculum", curriculum_id))
        })
    }

    fn curricula_for_user(&self, user_id: &str) -> Result<Vec<Curriculum>, TutorError> {
        self.read(|state| {
            let mut list: Vec<Curriculum> = state
                .curricula
                .values()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect();
            list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(list)
        })
    }

    fn delete_curriculum(&self, curriculum_id: &str) -> Result<(), TutorError> {
        self.write(
            |_| Ok(Shard::Curriculum(curriculum_id.to_string())),
            |state| {
                state
                    .curricula
                    .remove(curriculum_id)
                    .ok_or_else(|| TutorError::not_found("curriculum", curriculum_id))?;
                state.conversations.retain(|_, c| c.curriculum_id != curriculum_id);
                Ok(())
            },
        )
    }

    fn complete_unit(&self, unit_id: &str) -> Result<(CurriculumUnit, bool), TutorError> {
        {
            let state = self.lock()?;
            let done = state
                .curricula
                .values()
                .find_map(|c| c.units.iter().find(|u| u.id == unit_id).map(|u| (u, c)))
                .ok_or_else(|| TutorError::not_found("unit", unit_id))?;
            if done.0.complete {
                return Ok((done.0.clone(), done.1.is_complete()));
            }
        }
        self.write(
            |state| state.unit_shard(unit_id),
            |state| {
                let curriculum = state
                    .curricula
                    .values_mut()
                    .find(|c| c.units.iter().any(|u| u.id == unit_id))
                    .ok_or_else(|| TutorError::not_found("unit", unit_id))?;
                let unit = curriculum
                    .units
                    .iter_mut()
                    .find(|u| u.id == unit_id)
                    .ok_or_else(|| TutorError::not_found("unit", unit_id))?;
                unit.complete = true;
                let unit = unit.clone();
                Ok((unit, curriculum.is_complete()))
            },
        )
    }

    fn unit_context(&self, conversation_id: &str) -> Result<(Curriculum, usize), TutorError> {
        self.read(|state| {
            let conversation = state.conversation(conversation_id)?;
            let curriculum = state
                .curricula
                .get(&conversation.curriculum_id)
                .ok_or_else(|| TutorError::not_found("curriculum", &conversation.curriculum_id))?;
            let index = curriculum
                .units
                .iter()
                .position(|u| u.id == conversation.unit_id)
                .ok_or_else(|| TutorError::not_found("unit", &conversation.unit_id))?;
            Ok((curriculum.clone(), index))
        })
    }

    fn turns(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>, TutorError> {
        self.read(|state| Ok(state.conversation(conversation_id)?.turns.clone()))
    }

    fn last_turns(&self, conversation_id: &str, n: usize) -> Result<Vec<ConversationTurn>, TutorError> {
        self.read(|state| {
            let turns = &state.conversation(conversation_id)?.turns;
            let start = turns.len().saturating_sub(n);
            Ok(turns[start..].to_vec())
        })
    }

    fn turn_count(&self, conversation_id: &str) -> Result<usize, TutorError> {
        self.read(|state| Ok(state.conversation(conversation_id)?.turns.len()))
    }

    fn append_turns(
        &self,
        conversation_id: &str,
        turns: &[NewTurn],
        max_turns: usize,
    ) -> Result<Vec<ConversationTurn>, TutorError> {
        self.write(
            |state| state.conversation_shard(conversation_id),
            |state| {
                let conversation = state.conversation_mut(conversation_id)?;
                if conversation.turns.len() >= max_turns {
                    return Err(TutorError::QuotaExceeded { max: max_turns });
                }
                let now = Utc::now();
                let start = conversation.turns.len() as u64;
                let appended: Vec<ConversationTurn> = turns
                    .iter()
                    .enumerate()
                    .map(|(i, t)| ConversationTurn {
                        role: t.role,
                        content: t.content.clone(),
                        sequence: start + i as u64,
                        created_at: now,
                    })
                    .collect();
                conversation.turns.extend(appended.iter().cloned());
                debug!(conversation_id, appended = appended.len(), total = conversation.turns.len(), "turns appended");
                Ok(appended)
            },
        )
    }

    fn follow_ups(&self, conversation_id: &str) -> Result<Option<FollowUpSet>, TutorError> {
        self.read(|state| Ok(state.conversation(conversation_id)?.follow_ups.clone()))
    }

    fn replace_follow_ups(&self, conversation_id: &str, set: FollowUpSet) -> Result<bool, TutorError> {
        self.write(
            |state| state.conversation_shard(conversation_id),
            |state| {
                let conversation = state.conversation_mut(conversation_id)?;
                if let Some(existing) = &conversation.follow_ups
                    && existing.generated_at_turn > set.generated_at_turn
                {
                    debug!(
                        conversation_id,
                        stale = set.generated_at_turn,
                        current = existing.generated_at_turn,
                        "stale follow-up set discarded"
                    );
                    return Ok(false);
                }
                conversation.follow_ups = Some(set);
                Ok(true)
            },
        )
    }

    fn profile(&self, user_id: &str) -> Result<Option<LearnerProfile>, TutorError> {
        self.read(|state| Ok(state.profiles.get(user_id).cloned()))
    }

    fn save_profile(&self, user_id: &str, profile: &LearnerProfile) -> Result<(), TutorError> {
        self.write(
            |_| Ok(Shard::Profiles),
            |state| {
                state.profiles.insert(user_id.to_string(), profile.clone());
                Ok(())
            },
        )
    }
}
