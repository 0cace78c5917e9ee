//! Application facade for the admin panel and landing page.
//!
//! Admin operations check the authorization gate before touching the
//! pipeline or the catalog; public operations (browsing, contact form,
//! newsletter) do not.

use crate::auth::{AuthGate, TokenAuth};
use crate::catalog::Catalog;
use crate::image::{ImageProcessor, ImageService};
use crate::models::{
    Client, ClientUpdate, Config, Contact, ContactForm, DashboardCounts, NewClient, NewProject,
    PipelineConfig, Project, ProjectUpdate, SourceFile, StorageReference, Subscriber,
    WithImageUrl,
};
use crate::pipeline::{UploadPipeline, UploadState};
use crate::records::{BlobDocumentStore, DocumentStore, CATALOG_ROOT};
use crate::storage::{delete_best_effort, BlobStore, S3BlobStore};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Which kind of record an uploaded image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTarget {
    Project,
    Client,
}

impl ImageTarget {
    pub fn prefix(self) -> &'static str {
        match self {
            ImageTarget::Project => "projects",
            ImageTarget::Client => "clients",
        }
    }
}

pub struct App {
    pipeline: UploadPipeline,
    catalog: Catalog,
    blobs: Arc<dyn BlobStore>,
    auth: Box<dyn AuthGate>,
}

/// Injectable service bundle used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub image: Arc<dyn ImageService>,
    pub blobs: Arc<dyn BlobStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub auth: Box<dyn AuthGate>,
}

impl App {
    pub fn with_services(services: AppServices, pipeline: PipelineConfig) -> Self {
        Self {
            pipeline: UploadPipeline::new(services.image, services.blobs.clone(), pipeline),
            catalog: Catalog::new(services.documents, services.blobs.clone()),
            blobs: services.blobs,
            auth: services.auth,
        }
    }

    /// Build an app backed by S3 storage, authorizing `session_token` against
    /// the configured admin token.
    pub async fn new(config: &Config, session_token: Option<String>) -> Result<Self> {
        std::fs::create_dir_all(&config.pipeline.preview_dir)?;

        let blobs: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(&config.storage).await?);
        info!(
            "Storage: bucket {} at {}",
            config.storage.bucket, config.storage.endpoint
        );

        Ok(Self::with_storage(
            blobs,
            Box::new(TokenAuth::new(config.admin_token.clone(), session_token)),
            config.pipeline.clone(),
        ))
    }

    /// Images and catalog records both live in `blobs`; records under
    /// `catalog/<collection>.json`.
    pub fn with_storage(
        blobs: Arc<dyn BlobStore>,
        auth: Box<dyn AuthGate>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self::with_services(
            AppServices {
                image: Arc::new(ImageProcessor::new()),
                documents: Arc::new(BlobDocumentStore::new(blobs.clone(), CATALOG_ROOT)),
                blobs,
                auth,
            },
            pipeline,
        )
    }

    pub fn upload_state(&self) -> UploadState {
        self.pipeline.state()
    }

    async fn require_admin(&self) -> Result<()> {
        if self.auth.is_authorized().await? {
            Ok(())
        } else {
            warn!("Rejected unauthorized admin request");
            Err(Error::Permission("Admin session required".to_string()))
        }
    }

    // Images

    pub async fn upload_image(&self, file: SourceFile, target: ImageTarget) -> Result<StorageReference> {
        self.upload_to(file, target.prefix()).await
    }

    pub async fn upload_to(&self, file: SourceFile, prefix: &str) -> Result<StorageReference> {
        self.require_admin().await?;
        self.pipeline.normalize_and_upload(file, prefix).await
    }

    pub async fn image_url(&self, reference: &StorageReference) -> Result<String> {
        self.blobs.get_url(reference).await
    }

    pub async fn delete_image(&self, reference: &StorageReference) -> Result<()> {
        self.require_admin().await?;
        self.blobs.delete(reference).await
    }

    // Projects

    /// Upload `image` and create a project pointing at it. The blob is
    /// removed again if the record cannot be created.
    pub async fn create_project_with_image(
        &self,
        name: &str,
        description: &str,
        image: SourceFile,
    ) -> Result<Project> {
        let image_id = self.upload_image(image, ImageTarget::Project).await?;
        let project = NewProject {
            name: name.to_string(),
            description: description.to_string(),
            image_id: image_id.clone(),
        };
        match self.catalog.create_project(project).await {
            Ok(created) => Ok(created),
            Err(e) => {
                delete_best_effort(self.blobs.as_ref(), &image_id).await;
                Err(e)
            }
        }
    }

    pub async fn create_project(&self, project: NewProject) -> Result<Project> {
        self.require_admin().await?;
        self.catalog.create_project(project).await
    }

    pub async fn update_project(&self, id: &str, update: ProjectUpdate) -> Result<()> {
        self.require_admin().await?;
        self.catalog.update_project(id, update).await
    }

    pub async fn delete_project(&self, id: &str) -> Result<()> {
        self.require_admin().await?;
        self.catalog.delete_project(id).await
    }

    pub async fn list_projects(&self) -> Result<Vec<WithImageUrl<Project>>> {
        self.catalog.list_projects().await
    }

    // Clients

    pub async fn create_client_with_image(
        &self,
        name: &str,
        designation: &str,
        review: &str,
        image: SourceFile,
    ) -> Result<Client> {
        let image_id = self.upload_image(image, ImageTarget::Client).await?;
        let client = NewClient {
            name: name.to_string(),
            designation: designation.to_string(),
            review: review.to_string(),
            image_id: image_id.clone(),
        };
        match self.catalog.create_client(client).await {
            Ok(created) => Ok(created),
            Err(e) => {
                delete_best_effort(self.blobs.as_ref(), &image_id).await;
                Err(e)
            }
        }
    }

    pub async fn create_client(&self, client: NewClient) -> Result<Client> {
        self.require_admin().await?;
        self.catalog.create_client(client).await
    }

    pub async fn update_client(&self, id: &str, update: ClientUpdate) -> Result<()> {
        self.require_admin().await?;
        self.catalog.update_client(id, update).await
    }

    pub async fn delete_client(&self, id: &str) -> Result<()> {
        self.require_admin().await?;
        self.catalog.delete_client(id).await
    }

    pub async fn list_clients(&self) -> Result<Vec<WithImageUrl<Client>>> {
        self.catalog.list_clients().await
    }

    // Contacts and newsletter

    pub async fn submit_contact(&self, form: ContactForm) -> Result<Contact> {
        self.catalog.submit_contact(form).await
    }

    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        self.require_admin().await?;
        self.catalog.list_contacts().await
    }

    pub async fn subscribe(&self, email: &str) -> Result<Subscriber> {
        self.catalog.subscribe(email).await
    }

    pub async fn list_subscribers(&self) -> Result<Vec<Subscriber>> {
        self.require_admin().await?;
        self.catalog.list_subscribers().await
    }

    pub async fn dashboard(&self) -> Result<DashboardCounts> {
        self.require_admin().await?;
        self.catalog.dashboard_counts().await
    }
}

#[cfg(test)]
mod tests {
    use super::{App, AppServices, ImageTarget};
    use crate::auth::MockAuth;
    use crate::image::MockImageProcessor;
    use crate::models::{ContactForm, NewProject, PipelineConfig, SourceFile, StorageReference};
    use crate::records::InMemoryDocumentStore;
    use crate::storage::MockBlobStore;
    use pretty_assertions::assert_eq;
    use crate::{Error, ErrorKind};
    use std::sync::Arc;
    use tempfile::TempDir;

    const TEST_BASE_URL: &str = "https://storage.test";

    fn build_test_app(auth: MockAuth, blobs: MockBlobStore, preview_dir: &TempDir) -> App {
        App::with_services(
            AppServices {
                image: Arc::new(MockImageProcessor::new()),
                blobs: Arc::new(blobs),
                documents: Arc::new(InMemoryDocumentStore::new()),
                auth: Box::new(auth),
            },
            PipelineConfig {
                preview_dir: preview_dir.path().to_path_buf(),
                ..PipelineConfig::default()
            },
        )
    }

    fn image_file(name: &str) -> SourceFile {
        SourceFile::new(name, "image/png", vec![0x89, 0x50, 0x4E, 0x47])
    }

    #[tokio::test]
    async fn test_admin_upload_lands_under_target_prefix() {
        let dir = TempDir::new().unwrap();
        let blobs = MockBlobStore::new().with_base_url(TEST_BASE_URL.to_string());
        let app = build_test_app(MockAuth::new(), blobs.clone(), &dir);

        let reference = app
            .upload_image(image_file("face.png"), ImageTarget::Client)
            .await
            .unwrap();

        assert!(reference.as_str().starts_with("clients/"));
        assert_eq!(
            app.image_url(&reference).await.unwrap(),
            format!("{}/{}", TEST_BASE_URL, reference)
        );
        assert_eq!(blobs.get_put_count(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_upload_never_reaches_pipeline() {
        let dir = TempDir::new().unwrap();
        let blobs = MockBlobStore::new();
        let auth = MockAuth::denied();
        let app = build_test_app(auth.clone(), blobs.clone(), &dir);

        let err = app
            .upload_image(image_file("face.png"), ImageTarget::Project)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(auth.get_check_count(), 1);
        assert_eq!(blobs.get_put_count(), 0);
    }

    #[tokio::test]
    async fn test_create_project_with_image_links_reference() {
        let dir = TempDir::new().unwrap();
        let blobs = MockBlobStore::new();
        let app = build_test_app(MockAuth::new(), blobs.clone(), &dir);

        let project = app
            .create_project_with_image("Tower", "Glass and steel", image_file("tower.png"))
            .await
            .unwrap();

        assert!(project.image_id.as_str().starts_with("projects/"));
        assert!(blobs.contains(project.image_id.as_str()));

        let listed = app.list_projects().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].image_url.is_some());
    }

    #[tokio::test]
    async fn test_failed_record_creation_removes_uploaded_image() {
        let dir = TempDir::new().unwrap();
        let blobs = MockBlobStore::new();
        let app = build_test_app(MockAuth::new(), blobs.clone(), &dir);

        let err = app
            .create_project_with_image("", "No name", image_file("tower.png"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(blobs.get_put_count(), 1);
        assert!(blobs.get_files().is_empty());
    }

    #[tokio::test]
    async fn test_public_operations_skip_auth() {
        let dir = TempDir::new().unwrap();
        let auth = MockAuth::denied();
        let app = build_test_app(auth.clone(), MockBlobStore::new(), &dir);

        app.subscribe("fan@example.com").await.unwrap();
        app.submit_contact(ContactForm {
            full_name: "Fan".to_string(),
            email: "fan@example.com".to_string(),
            mobile: "555".to_string(),
            city: "Paris".to_string(),
        })
        .await
        .unwrap();
        assert!(app.list_projects().await.unwrap().is_empty());
        assert_eq!(auth.get_check_count(), 0);

        assert!(matches!(app.list_contacts().await, Err(Error::Permission(_))));
        assert!(matches!(app.list_subscribers().await, Err(Error::Permission(_))));
        assert!(matches!(app.dashboard().await, Err(Error::Permission(_))));
    }

    #[tokio::test]
    async fn test_mutations_require_admin() {
        let dir = TempDir::new().unwrap();
        let auth = MockAuth::denied();
        let app = build_test_app(auth.clone(), MockBlobStore::new(), &dir);

        let result = app
            .create_project(NewProject {
                name: "Tower".to_string(),
                description: "d".to_string(),
                image_id: StorageReference::new("projects/1_a.jpg"),
            })
            .await;
        assert!(matches!(result, Err(Error::Permission(_))));
        assert!(matches!(
            app.delete_project("any").await,
            Err(Error::Permission(_))
        ));
        assert!(matches!(
            app.delete_image(&StorageReference::new("projects/1_a.jpg")).await,
            Err(Error::Permission(_))
        ));

        auth.set_authorized(true);
        assert!(matches!(
            app.delete_project("any").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_apps_sharing_a_bucket_share_the_catalog() {
        let dir = TempDir::new().unwrap();
        let blobs = MockBlobStore::new();
        let config = PipelineConfig {
            preview_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let first = App::with_storage(
            Arc::new(blobs.clone()),
            Box::new(MockAuth::new()),
            config.clone(),
        );
        let second = App::with_storage(
            Arc::new(blobs.clone()),
            Box::new(MockAuth::new()),
            config,
        );

        let project = first
            .create_project(NewProject {
                name: "Tower".to_string(),
                description: "Glass and steel".to_string(),
                image_id: StorageReference::new("projects/1_tower.jpg"),
            })
            .await
            .unwrap();
        second.subscribe("fan@example.com").await.unwrap();

        let seen_by_second = second.list_projects().await.unwrap();
        assert_eq!(seen_by_second.len(), 1);
        assert_eq!(seen_by_second[0].record.id, project.id);
        assert!(matches!(
            first.subscribe("fan@example.com").await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(first.dashboard().await.unwrap().subscribers, 1);
        assert!(blobs.contains("catalog/projects.json"));
    }
}
