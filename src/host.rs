//! SQL implementation of the host read model.
//!
//! Usable wherever the index shares the host application's database: reads
//! the submission graph from the same host tables the ranked queries join
//! against (`submissions`, `publications`), plus the settings tables the host
//! stores locale-keyed metadata in.

use std::path::PathBuf;

use sqlx::{AnyPool, Row};

use crate::search::{RankingDialect, SearchError};
use crate::{
    Author, ContextInfo, HostRepository, Publication, Submission, SubmissionFileRef,
    SubmissionStatus, FILE_STAGE_PROOF,
};

pub struct SqlHostRepository {
    pool: AnyPool,
    dialect: &'static dyn RankingDialect,
}

impl SqlHostRepository {
    pub fn new(pool: AnyPool, dialect: &'static dyn RankingDialect) -> Self {
        Self { pool, dialect }
    }

    async fn load_publication(&self, publication_id: i64) -> Result<Publication, SearchError> {
        let mut publication = Publication { id: publication_id, ..Publication::default() };

        // deterministic row order keeps list-valued attributes normalizing
        // to the same string on every load
        let sql = format!(
            "SELECT locale, setting_name, setting_value FROM publication_settings \
             WHERE publication_id = {} ORDER BY setting_name, locale, setting_value",
            self.dialect.placeholder(1)
        );
        let rows = sqlx::query(&sql)
            .bind(publication_id)
            .fetch_all(&self.pool)
            .await
            .map_err(SearchError::Storage)?;

        for row in rows {
            let locale: String = row.try_get(0).map_err(SearchError::Storage)?;
            let name: String = row.try_get(1).map_err(SearchError::Storage)?;
            let value: Option<String> = row.try_get(2).map_err(SearchError::Storage)?;
            let Some(value) = value else { continue };
            match name.as_str() {
                "title" => {
                    publication.title.insert(locale, value);
                }
                "subtitle" => {
                    publication.subtitle.insert(locale, value);
                }
                "abstract" => {
                    publication.abstract_text.insert(locale, value);
                }
                "keywords" => publication.keywords.entry(locale).or_default().push(value),
                "subjects" => publication.subjects.entry(locale).or_default().push(value),
                "disciplines" => publication.disciplines.entry(locale).or_default().push(value),
                "coverage" => {
                    publication.coverage.get_or_insert(value);
                }
                "type" => {
                    publication.submission_type.get_or_insert(value);
                }
                _ => {}
            }
        }

        publication.authors = self.load_authors(publication_id).await?;
        Ok(publication)
    }

    async fn load_authors(&self, publication_id: i64) -> Result<Vec<Author>, SearchError> {
        let sql = format!(
            "SELECT author_id FROM authors WHERE publication_id = {} ORDER BY seq",
            self.dialect.placeholder(1)
        );
        let rows = sqlx::query(&sql)
            .bind(publication_id)
            .fetch_all(&self.pool)
            .await
            .map_err(SearchError::Storage)?;

        let settings_sql = format!(
            "SELECT locale, setting_name, setting_value FROM author_settings \
             WHERE author_id = {} ORDER BY setting_name, locale, setting_value",
            self.dialect.placeholder(1)
        );

        let mut authors = Vec::with_capacity(rows.len());
        for row in rows {
            let author_id: i64 = row.try_get(0).map_err(SearchError::Storage)?;
            let mut author = Author::default();
            let settings = sqlx::query(&settings_sql)
                .bind(author_id)
                .fetch_all(&self.pool)
                .await
                .map_err(SearchError::Storage)?;
            for setting in settings {
                let locale: String = setting.try_get(0).map_err(SearchError::Storage)?;
                let name: String = setting.try_get(1).map_err(SearchError::Storage)?;
                let value: Option<String> = setting.try_get(2).map_err(SearchError::Storage)?;
                let Some(value) = value else { continue };
                match name.as_str() {
                    "givenName" => {
                        author.given_name.insert(locale, value);
                    }
                    "familyName" => {
                        author.family_name.insert(locale, value);
                    }
                    "preferredPublicName" => {
                        author.preferred_public_name.insert(locale, value);
                    }
                    "affiliation" => {
                        author.affiliation.insert(locale, value);
                    }
                    _ => {}
                }
            }
            authors.push(author);
        }
        Ok(authors)
    }

    fn file_from_row(row: &sqlx::any::AnyRow) -> Result<SubmissionFileRef, SearchError> {
        let path: String = row.try_get(3).map_err(SearchError::Storage)?;
        Ok(SubmissionFileRef {
            id: row.try_get(0).map_err(SearchError::Storage)?,
            submission_id: row.try_get(1).map_err(SearchError::Storage)?,
            file_stage: row.try_get(2).map_err(SearchError::Storage)?,
            path: PathBuf::from(path),
            mime_type: row.try_get(4).map_err(SearchError::Storage)?,
        })
    }
}

#[async_trait::async_trait]
impl HostRepository for SqlHostRepository {
    async fn contexts(&self) -> Result<Vec<ContextInfo>, SearchError> {
        let rows = sqlx::query("SELECT context_id, name FROM contexts ORDER BY context_id")
            .fetch_all(&self.pool)
            .await
            .map_err(SearchError::Storage)?;
        rows.iter()
            .map(|row| {
                Ok(ContextInfo {
                    id: row.try_get(0).map_err(SearchError::Storage)?,
                    name: row.try_get(1).map_err(SearchError::Storage)?,
                })
            })
            .collect()
    }

    async fn submission(&self, submission_id: i64) -> Result<Option<Submission>, SearchError> {
        let sql = format!(
            "SELECT submission_id, context_id, status, current_publication_id \
             FROM submissions WHERE submission_id = {}",
            self.dialect.placeholder(1)
        );
        let Some(row) = sqlx::query(&sql)
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SearchError::Storage)?
        else {
            return Ok(None);
        };

        let status: i64 = row.try_get(2).map_err(SearchError::Storage)?;
        let current_publication_id: i64 = row.try_get(3).map_err(SearchError::Storage)?;
        let current_publication = self.load_publication(current_publication_id).await?;

        Ok(Some(Submission {
            id: row.try_get(0).map_err(SearchError::Storage)?,
            context_id: row.try_get(1).map_err(SearchError::Storage)?,
            status: SubmissionStatus::from_i64(status),
            current_publication,
        }))
    }

    async fn published_submissions(
        &self,
        context_id: i64,
    ) -> Result<Vec<Submission>, SearchError> {
        let sql = format!(
            "SELECT submission_id FROM submissions \
             WHERE context_id = {} AND status = {} ORDER BY submission_id",
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        );
        let rows = sqlx::query(&sql)
            .bind(context_id)
            .bind(SubmissionStatus::Published.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(SearchError::Storage)?;

        let mut submissions = Vec::with_capacity(rows.len());
        for row in rows {
            let submission_id: i64 = row.try_get(0).map_err(SearchError::Storage)?;
            if let Some(submission) = self.submission(submission_id).await? {
                submissions.push(submission);
            }
        }
        Ok(submissions)
    }

    async fn proof_files(
        &self,
        submission_id: i64,
    ) -> Result<Vec<SubmissionFileRef>, SearchError> {
        let sql = format!(
            "SELECT submission_file_id, submission_id, file_stage, path, mime_type \
             FROM submission_files WHERE submission_id = {} AND file_stage = {} \
             ORDER BY submission_file_id",
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        );
        let rows = sqlx::query(&sql)
            .bind(submission_id)
            .bind(FILE_STAGE_PROOF)
            .fetch_all(&self.pool)
            .await
            .map_err(SearchError::Storage)?;
        rows.iter().map(Self::file_from_row).collect()
    }

    async fn file(
        &self,
        submission_file_id: i64,
    ) -> Result<Option<SubmissionFileRef>, SearchError> {
        let sql = format!(
            "SELECT submission_file_id, submission_id, file_stage, path, mime_type \
             FROM submission_files WHERE submission_file_id = {}",
            self.dialect.placeholder(1)
        );
        let row = sqlx::query(&sql)
            .bind(submission_file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SearchError::Storage)?;
        row.as_ref().map(Self::file_from_row).transpose()
    }
}
