//! Projects, clients, contact submissions and newsletter subscribers
//!
//! Record-level operations the admin panel and landing page perform. Image
//! references are attached to projects and clients here; removing or
//! replacing a record's image deletes the old blob on a best-effort basis.

use crate::models::{
    Client, ClientUpdate, Contact, ContactForm, DashboardCounts, NewClient, NewProject, Project,
    ProjectUpdate, StorageReference, Subscriber, WithImageUrl,
};
use crate::records::{
    from_document, to_fields, DocumentStore, CLIENTS, CONTACTS, PROJECTS, SUBSCRIBERS,
};
use crate::storage::{delete_best_effort, BlobStore};
use crate::{Error, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Catalog {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl Catalog {
    pub fn new(documents: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { documents, blobs }
    }

    // Projects

    pub async fn create_project(&self, project: NewProject) -> Result<Project> {
        require_non_blank("name", &project.name)?;
        require_non_blank("description", &project.description)?;

        let created_at = Utc::now().timestamp_millis();
        let mut fields = to_fields(&project)?;
        fields["createdAt"] = json!(created_at);
        let id = self.documents.insert(PROJECTS, fields).await?;
        info!("Created project {} ({})", id, project.name);

        Ok(Project {
            id,
            name: project.name,
            description: project.description,
            image_id: project.image_id,
            created_at,
        })
    }

    pub async fn list_projects(&self) -> Result<Vec<WithImageUrl<Project>>> {
        let mut projects: Vec<Project> = self.load_all(PROJECTS).await?;
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut views = Vec::with_capacity(projects.len());
        for project in projects {
            let image_url = self.resolve_url(&project.image_id).await;
            views.push(WithImageUrl {
                record: project,
                image_url,
            });
        }
        Ok(views)
    }

    pub async fn update_project(&self, id: &str, update: ProjectUpdate) -> Result<()> {
        require_non_blank("name", &update.name)?;
        require_non_blank("description", &update.description)?;

        let existing: Project = self.load(PROJECTS, id).await?;
        let mut fields = json!({
            "name": update.name,
            "description": update.description,
        });
        if let Some(image_id) = &update.image_id {
            fields["imageId"] = json!(image_id);
        }
        self.documents.patch(PROJECTS, id, fields).await?;
        info!("Updated project {}", id);

        self.release_replaced_image(&existing.image_id, update.image_id.as_ref())
            .await;
        Ok(())
    }

    pub async fn delete_project(&self, id: &str) -> Result<()> {
        let removed: Project = self.remove(PROJECTS, id).await?;
        info!("Deleted project {}", id);
        delete_best_effort(self.blobs.as_ref(), &removed.image_id).await;
        Ok(())
    }

    // Clients

    pub async fn create_client(&self, client: NewClient) -> Result<Client> {
        require_non_blank("name", &client.name)?;
        require_non_blank("designation", &client.designation)?;
        require_non_blank("review", &client.review)?;

        let created_at = Utc::now().timestamp_millis();
        let mut fields = to_fields(&client)?;
        fields["createdAt"] = json!(created_at);
        let id = self.documents.insert(CLIENTS, fields).await?;
        info!("Created client {} ({})", id, client.name);

        Ok(Client {
            id,
            name: client.name,
            designation: client.designation,
            review: client.review,
            image_id: client.image_id,
            created_at,
        })
    }

    pub async fn list_clients(&self) -> Result<Vec<WithImageUrl<Client>>> {
        let mut clients: Vec<Client> = self.load_all(CLIENTS).await?;
        clients.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut views = Vec::with_capacity(clients.len());
        for client in clients {
            let image_url = self.resolve_url(&client.image_id).await;
            views.push(WithImageUrl {
                record: client,
                image_url,
            });
        }
        Ok(views)
    }

    pub async fn update_client(&self, id: &str, update: ClientUpdate) -> Result<()> {
        require_non_blank("name", &update.name)?;
        require_non_blank("designation", &update.designation)?;
        require_non_blank("review", &update.review)?;

        let existing: Client = self.load(CLIENTS, id).await?;
        let mut fields = json!({
            "name": update.name,
            "designation": update.designation,
            "review": update.review,
        });
        if let Some(image_id) = &update.image_id {
            fields["imageId"] = json!(image_id);
        }
        self.documents.patch(CLIENTS, id, fields).await?;
        info!("Updated client {}", id);

        self.release_replaced_image(&existing.image_id, update.image_id.as_ref())
            .await;
        Ok(())
    }

    pub async fn delete_client(&self, id: &str) -> Result<()> {
        let removed: Client = self.remove(CLIENTS, id).await?;
        info!("Deleted client {}", id);
        delete_best_effort(self.blobs.as_ref(), &removed.image_id).await;
        Ok(())
    }

    // Contacts

    pub async fn submit_contact(&self, form: ContactForm) -> Result<Contact> {
        require_non_blank("full name", &form.full_name)?;
        require_non_blank("mobile", &form.mobile)?;
        require_non_blank("city", &form.city)?;
        let email = checked_email(&form.email)?.to_string();

        let submitted_at = Utc::now().timestamp_millis();
        let fields = json!({
            "fullName": form.full_name.trim(),
            "email": email,
            "mobile": form.mobile.trim(),
            "city": form.city.trim(),
            "submittedAt": submitted_at,
        });
        let id = self.documents.insert(CONTACTS, fields).await?;
        info!("Contact submission {} received", id);

        Ok(Contact {
            id,
            full_name: form.full_name.trim().to_string(),
            email,
            mobile: form.mobile.trim().to_string(),
            city: form.city.trim().to_string(),
            submitted_at,
        })
    }

    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut contacts: Vec<Contact> = self.load_all(CONTACTS).await?;
        contacts.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(contacts)
    }

    // Subscribers

    /// Add `email` to the newsletter. Duplicates are detected through the
    /// indexed lookup only.
    pub async fn subscribe(&self, email: &str) -> Result<Subscriber> {
        let email = checked_email(email)?.to_lowercase();

        let existing = self
            .documents
            .find_by(SUBSCRIBERS, "email", &Value::String(email.clone()))
            .await?;
        if !existing.is_empty() {
            return Err(Error::Conflict("Email already subscribed".to_string()));
        }

        let subscribed_at = Utc::now().timestamp_millis();
        let id = self
            .documents
            .insert(
                SUBSCRIBERS,
                json!({ "email": email, "subscribedAt": subscribed_at }),
            )
            .await?;
        info!("New subscriber {}", id);

        Ok(Subscriber {
            id,
            email,
            subscribed_at,
        })
    }

    pub async fn list_subscribers(&self) -> Result<Vec<Subscriber>> {
        let mut subscribers: Vec<Subscriber> = self.load_all(SUBSCRIBERS).await?;
        subscribers.sort_by(|a, b| b.subscribed_at.cmp(&a.subscribed_at));
        Ok(subscribers)
    }

    pub async fn dashboard_counts(&self) -> Result<DashboardCounts> {
        Ok(DashboardCounts {
            projects: self.documents.list(PROJECTS).await?.len(),
            clients: self.documents.list(CLIENTS).await?.len(),
            contacts: self.documents.list(CONTACTS).await?.len(),
            subscribers: self.documents.list(SUBSCRIBERS).await?.len(),
        })
    }

    async fn load_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.documents
            .list(collection)
            .await?
            .into_iter()
            .map(|(id, fields)| from_document(&id, fields))
            .collect()
    }

    async fn load<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<T> {
        let fields = self
            .documents
            .get(collection, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}/{}", collection, id)))?;
        from_document(id, fields)
    }

    async fn remove<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<T> {
        let fields = self
            .documents
            .delete(collection, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}/{}", collection, id)))?;
        from_document(id, fields)
    }

    async fn resolve_url(&self, reference: &StorageReference) -> Option<String> {
        match self.blobs.get_url(reference).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Error getting image URL for {}: {}", reference, e);
                None
            }
        }
    }

    async fn release_replaced_image(
        &self,
        previous: &StorageReference,
        replacement: Option<&StorageReference>,
    ) {
        if let Some(replacement) = replacement {
            if replacement != previous {
                delete_best_effort(self.blobs.as_ref(), previous).await;
            }
        }
    }
}

fn require_non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("The {} field is required", field)));
    }
    Ok(())
}

/// Trimmed `raw`, if it has a non-empty local part and domain.
fn checked_email(raw: &str) -> Result<&str> {
    let email = raw.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(Error::Validation(
            "Please enter a valid email address".to_string(),
        )),
    }
}
