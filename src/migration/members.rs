use super::strategy::EntityMigration;
use super::Result;
use crate::assets::PreparedAsset;
use crate::ledger::{Call, EntityKind};
use crate::snapshot::Member;

pub struct MemberMigration {
    batch_size: usize,
}

impl MemberMigration {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }
}

impl EntityMigration for MemberMigration {
    type Entity = Member;

    fn name(&self) -> &'static str {
        "members"
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Member
    }

    fn calls_per_entity(&self) -> usize {
        1
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn prepare_calls(&self, member: &Member, _assets: &[PreparedAsset]) -> Result<Vec<Call>> {
        Ok(vec![Call::CreateMember {
            handle: member.handle.clone(),
            root_account: member.root_account.clone(),
            controller_account: member.controller_account.clone(),
            name: member.name.clone(),
            about: member.about.clone(),
            avatar_uri: member.avatar_uri.clone(),
        }])
    }
}
