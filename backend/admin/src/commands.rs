use std::{fs::File, io::BufWriter, path::Path, sync::Arc};

use anyhow::{Context, bail};
use contact::{
    ContactForm, ListQuery, Priority, Submission, SubmissionPatch, SubmissionStatus,
    query::MAX_PAGE_SIZE,
};
use folio::{FileStorage, FormPersistence, PersistOptions};
use indicatif::{ProgressBar, ProgressStyle};

use crate::client::AdminClient;

pub const DRAFT_KEY: &str = "contact-draft";

pub async fn list(client: &AdminClient, query: ListQuery) -> anyhow::Result<()> {
    let page = client.list(&query.sanitized()).await?;

    for submission in &page.items {
        println!("{}", row(submission));
    }

    println!(
        "\nPage {}/{} ({} total)",
        page.page,
        page.total_pages.max(1),
        page.total
    );

    Ok(())
}

pub async fn show(client: &AdminClient, id: &str) -> anyhow::Result<()> {
    let submission = client.get(id).await?;
    println!("{}", serde_json::to_string_pretty(&submission)?);

    Ok(())
}

pub async fn update(client: &AdminClient, id: &str, patch: SubmissionPatch) -> anyhow::Result<()> {
    if patch.is_empty() {
        bail!("Nothing to update, pass --status, --priority, --clear-priority, --tag or --clear-tags");
    }

    let submission = client.update(id, &patch).await?;
    println!("{}", row(&submission));

    Ok(())
}

pub async fn export(client: &AdminClient, path: &Path) -> anyhow::Result<()> {
    let mut query = ListQuery {
        page_size: MAX_PAGE_SIZE,
        ..Default::default()
    };

    let first = client.list(&query).await?;

    let pb = ProgressBar::new(first.total);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    let mut has_next = first.has_next();
    let mut submissions = first.items;
    pb.set_position(submissions.len() as u64);

    while has_next {
        query.page += 1;
        pb.set_message(format!("Fetching page {}", query.page));

        let page = client.list(&query).await?;
        has_next = page.has_next();
        pb.inc(page.items.len() as u64);
        submissions.extend(page.items);
    }

    pb.finish_with_message("Done");

    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &submissions)?;

    println!("Exported {} submissions to {}", submissions.len(), path.display());

    Ok(())
}

pub async fn queue(client: &AdminClient, retry: bool, clear_sent: bool) -> anyhow::Result<()> {
    if retry {
        println!("{}", client.retry_failed().await?.message);
    }

    if clear_sent {
        println!("{}", client.clear_sent().await?.message);
    }

    let stats = client.queue().await?;
    println!(
        "Pending: {}\nSending: {}\nSent: {}\nFailed: {}",
        stats.pending, stats.sending, stats.sent, stats.failed
    );

    Ok(())
}

pub async fn stats(client: &AdminClient) -> anyhow::Result<()> {
    let stats = client.stats().await?;

    for (status, count) in &stats.by_status {
        println!("{status:<10}{count}");
    }
    println!("{:<10}{}", "total", stats.total);

    Ok(())
}

/// Submits a contact form, keeping a draft whenever it does not go through.
pub async fn submit_contact(
    client: &AdminClient,
    storage: Arc<FileStorage>,
    fields: ContactForm,
    resume: bool,
) -> anyhow::Result<()> {
    let mut draft = FormPersistence::<ContactForm>::new(storage, PersistOptions::new(DRAFT_KEY));

    let base = match resume {
        true => draft.restore()?.unwrap_or_default(),
        false => ContactForm::default(),
    };
    let form = merge(base, fields);

    if let Err(errors) = form.validate() {
        draft.update(form);
        draft.save_now()?;

        for error in &errors {
            eprintln!("{}: {}", error.field, error.message);
        }
        bail!("Form is invalid, fix the fields above and rerun with --resume");
    }

    match client.submit_contact(&form).await {
        Ok(response) => {
            draft.clear()?;
            println!("{}", response.message);
            Ok(())
        }
        Err(e) => {
            draft.update(form);
            draft.save_now()?;
            Err(e.context("Submission failed, draft kept for --resume"))
        }
    }
}

/// Non-empty fields of `overrides` replace those of `base`.
pub fn merge(base: ContactForm, overrides: ContactForm) -> ContactForm {
    let pick = |new: String, old: String| if new.is_empty() { old } else { new };

    ContactForm {
        name: pick(overrides.name, base.name),
        email: pick(overrides.email, base.email),
        subject: pick(overrides.subject, base.subject),
        message: pick(overrides.message, base.message),
    }
}

pub fn build_patch(
    status: Option<SubmissionStatus>,
    priority: Option<u8>,
    clear_priority: bool,
    tags: Vec<String>,
    clear_tags: bool,
) -> anyhow::Result<SubmissionPatch> {
    let priority = match (priority, clear_priority) {
        (Some(_), true) => bail!("--priority and --clear-priority conflict"),
        (Some(value), false) => Some(Some(
            Priority::new(value).with_context(|| format!("Priority {value} is not between 1 and 5"))?,
        )),
        (None, true) => Some(None),
        (None, false) => None,
    };

    let tags = match (tags.is_empty(), clear_tags) {
        (false, true) => bail!("--tag and --clear-tags conflict"),
        (false, false) => Some(tags),
        (true, true) => Some(Vec::new()),
        (true, false) => None,
    };

    Ok(SubmissionPatch {
        status,
        priority,
        tags,
    })
}

fn row(submission: &Submission) -> String {
    let priority = submission
        .priority
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{}  {:<9}{:<3}{}  {} <{}>  {}",
        submission.id,
        submission.status,
        priority,
        submission.created_at.format("%Y-%m-%d %H:%M"),
        submission.name,
        submission.email,
        submission.subject
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, message: &str) -> ContactForm {
        ContactForm {
            name: name.to_string(),
            email: "ada@example.com".to_string(),
            subject: "Hello".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_merge_keeps_draft_fields() {
        let draft = form("Ada", "Draft message body");
        let overrides = ContactForm {
            message: "Rewritten message body".to_string(),
            ..Default::default()
        };

        let merged = merge(draft, overrides);
        assert_eq!(merged.name, "Ada");
        assert_eq!(merged.message, "Rewritten message body");
    }

    #[test]
    fn test_build_patch() {
        let patch = build_patch(Some(SubmissionStatus::Read), Some(3), false, vec![], false).unwrap();
        assert_eq!(patch.status, Some(SubmissionStatus::Read));
        assert_eq!(patch.priority, Some(Priority::new(3)));
        assert_eq!(patch.tags, None);

        let patch = build_patch(None, None, true, vec![], true).unwrap();
        assert_eq!(patch.priority, Some(None));
        assert_eq!(patch.tags, Some(vec![]));

        assert!(build_patch(None, None, false, vec![], false).unwrap().is_empty());
        assert!(build_patch(None, Some(9), false, vec![], false).is_err());
        assert!(build_patch(None, Some(2), true, vec![], false).is_err());
    }
}
