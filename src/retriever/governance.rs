//! Governance snapshot space retriever.
//!
//! Reads the space summary first, then pulls every vote and proposal of the
//! space using the summary counts to plan `first`/`skip` pages. All pages of
//! both lists are requested concurrently.

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use futures::future::try_join_all;
use log::debug;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use url::Url;

use super::{
    http::{endpoint_url, HttpClient},
    pagination, RetrieveError, RetrieveWindow, Retriever, SourceId, SourceOutput,
};
use crate::config::GovernanceSettings;

const SPACE_QUERY: &str = r#"
    query Space($spaceID: String!) {
      space(id: $spaceID) {
        members
        votesCount
        proposalsCount
        admins
      }
    }
"#;

const VOTES_QUERY: &str = r#"
    query Votes($first: Int!, $skip: Int!, $spaceID: String!) {
      votes(first: $first, skip: $skip, where: {space: $spaceID}) {
        voter
      }
    }
"#;

const PROPOSALS_QUERY: &str = r#"
    query Proposals($first: Int!, $skip: Int!, $spaceID: String!) {
      proposals(first: $first, skip: $skip, where: {space: $spaceID}) {
        author
      }
    }
"#;

#[derive(Debug, Deserialize)]
struct SpaceData {
    space: Option<Space>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Space {
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    admins: Vec<String>,
    votes_count: u64,
    proposals_count: u64,
}

#[derive(Debug, Deserialize)]
struct VotesData {
    votes: Vec<Vote>,
}

#[derive(Debug, Deserialize)]
struct Vote {
    voter: String,
}

#[derive(Debug, Deserialize)]
struct ProposalsData {
    proposals: Vec<Proposal>,
}

#[derive(Debug, Deserialize)]
struct Proposal {
    author: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GovernanceOutput {
    pub community_proposals_count: u64,
    pub core_proposals_count: u64,
    pub votes_count: u64,
    pub voters_count: u64,
}

pub struct GovernanceRetriever {
    http: HttpClient,
    url: Url,
    space_id: String,
}

impl GovernanceRetriever {
    pub fn new(
        settings: &GovernanceSettings,
        request_timeout: Duration,
    ) -> Result<Self, RetrieveError> {
        Ok(Self {
            http: HttpClient::new(SourceId::Governance, request_timeout)?,
            url: endpoint_url(&settings.base_url)?,
            space_id: settings.space_id.clone(),
        })
    }

    async fn get_space(&self) -> Result<Space, RetrieveError> {
        let data: SpaceData = self
            .http
            .post_graphql(&self.url, None, SPACE_QUERY, json!({ "spaceID": self.space_id }))
            .await?;

        data.space
            .ok_or_else(|| RetrieveError::Schema(format!("space {} not found", self.space_id)))
    }

    /// Fetch `total` items of a paginated list, one request per page.
    async fn get_all<T: DeserializeOwned>(
        &self,
        query: &str,
        total: u64,
    ) -> Result<Vec<T>, RetrieveError> {
        let pages = pagination(total);
        debug!(
            "[{}] fetching {} items in {} pages",
            SourceId::Governance,
            total,
            pages.len()
        );

        let requests = pages.into_iter().map(|page| {
            self.http.post_graphql::<T, _>(
                &self.url,
                None,
                query,
                json!({ "first": page.first, "skip": page.skip, "spaceID": self.space_id }),
            )
        });

        try_join_all(requests).await
    }

    async fn get_votes(&self, votes_count: u64) -> Result<Vec<Vote>, RetrieveError> {
        let pages: Vec<VotesData> = self.get_all(VOTES_QUERY, votes_count).await?;
        Ok(pages.into_iter().flat_map(|page| page.votes).collect())
    }

    async fn get_proposals(&self, proposals_count: u64) -> Result<Vec<Proposal>, RetrieveError> {
        let pages: Vec<ProposalsData> = self.get_all(PROPOSALS_QUERY, proposals_count).await?;
        Ok(pages.into_iter().flat_map(|page| page.proposals).collect())
    }

    /// Proposals authored by a space admin or member are core proposals,
    /// everything else is a community proposal.
    fn serialize(space: &Space, votes: &[Vote], proposals: &[Proposal]) -> GovernanceOutput {
        let core_authors: HashSet<String> = space
            .admins
            .iter()
            .chain(space.members.iter())
            .map(|address| address.to_lowercase())
            .collect();

        let core_proposals_count = proposals
            .iter()
            .filter(|proposal| core_authors.contains(&proposal.author.to_lowercase()))
            .count() as u64;

        let voters: HashSet<String> = votes
            .iter()
            .map(|vote| vote.voter.to_lowercase())
            .collect();

        GovernanceOutput {
            community_proposals_count: proposals.len() as u64 - core_proposals_count,
            core_proposals_count,
            votes_count: votes.len() as u64,
            voters_count: voters.len() as u64,
        }
    }
}

#[async_trait]
impl Retriever for GovernanceRetriever {
    fn source(&self) -> SourceId {
        SourceId::Governance
    }

    async fn retrieve(&self, _window: &RetrieveWindow) -> Result<SourceOutput, RetrieveError> {
        let space = self.get_space().await?;

        let (votes, proposals) = futures::try_join!(
            self.get_votes(space.votes_count),
            self.get_proposals(space.proposals_count),
        )?;

        Ok(SourceOutput::Governance(Self::serialize(
            &space, &votes, &proposals,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(voter: &str) -> Vote {
        Vote {
            voter: voter.to_string(),
        }
    }

    fn proposal(author: &str) -> Proposal {
        Proposal {
            author: author.to_string(),
        }
    }

    #[test]
    fn test_serialize_counts() {
        let space = Space {
            members: vec!["member-1".to_string()],
            admins: vec!["admin-1".to_string()],
            votes_count: 3,
            proposals_count: 3,
        };
        let votes = [vote("voter-1"), vote("voter-2"), vote("voter-1")];
        let proposals = [proposal("admin-1"), proposal("community-1"), proposal("Member-1")];

        let output = GovernanceRetriever::serialize(&space, &votes, &proposals);

        assert_eq!(
            output,
            GovernanceOutput {
                community_proposals_count: 1,
                core_proposals_count: 2,
                votes_count: 3,
                voters_count: 2,
            }
        );
    }

    #[test]
    fn test_voters_are_case_insensitive() {
        let space = Space {
            members: vec![],
            admins: vec![],
            votes_count: 3,
            proposals_count: 0,
        };
        let votes = [vote("0xAbC1"), vote("0xabc1"), vote("0xDEF2")];

        let output = GovernanceRetriever::serialize(&space, &votes, &[]);

        assert_eq!(output.votes_count, 3);
        assert_eq!(output.voters_count, 2);
    }

    #[test]
    fn test_serialize_empty_space() {
        let space = Space {
            members: vec![],
            admins: vec![],
            votes_count: 0,
            proposals_count: 0,
        };
        let output = GovernanceRetriever::serialize(&space, &[], &[]);
        assert_eq!(output, GovernanceOutput::default());
    }

    #[test]
    fn test_space_payload_shape() {
        let data: SpaceData = serde_json::from_str(
            r#"{"space": {"members": ["a"], "admins": [], "votesCount": 3500, "proposalsCount": 12}}"#,
        )
        .unwrap();
        let space = data.space.unwrap();
        assert_eq!(space.votes_count, 3500);
        assert_eq!(pagination(space.votes_count).len(), 4);

        let missing: SpaceData = serde_json::from_str(r#"{"space": null}"#).unwrap();
        assert!(missing.space.is_none());
    }
}
